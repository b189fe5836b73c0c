//! Core types, tunables, configuration and errors (always included).

pub mod constants;
mod config;
mod error;
mod types;

pub use config::*;
pub use error::*;
pub use types::*;
