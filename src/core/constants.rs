//! Process-wide tunables for the Ngl client layer.
//!
//! These are the defaults used by [`NetConfig`](super::NetConfig); every
//! value can be overridden per client through the config builder.

use std::time::Duration;

// =============================================================================
// RECONNECT
// =============================================================================

/// Upper bound on the delay between two connect attempts for one role.
pub const MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before reconnecting after a long-lived, registered session drops.
pub const QUICK_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Consecutive short-lived sessions tolerated before giving up.
pub const MAX_IMMEDIATE_DISCONNECTS: u32 = 5;

/// Consecutive failed connect attempts tolerated before giving up.
pub const MAX_FAILED_CONNECTS: u32 = 5;

/// A session that lasted less than this counts as an immediate disconnect.
///
/// Short sessions usually mean the port is open but nothing on the other
/// side speaks our protocol.
pub const MIN_VALID_CONNECTION: Duration = Duration::from_secs(25);

// =============================================================================
// KEEP-ALIVE
// =============================================================================

/// Interval between keep-alive pings on an established connection.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Connection is dead if nothing was heard for this long.
pub const PING_TIMEOUT: Duration = Duration::from_secs(30 * 10);

/// A connect attempt that has not completed after this long is abandoned.
pub const DISCONNECTED_TIMEOUT: Duration = PING_INTERVAL;

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Default deadline for an outstanding transaction.
pub const DEFAULT_TRANS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// ENDPOINTS
// =============================================================================

/// Port appended to server names that do not carry one.
pub const DEFAULT_CLIENT_PORT: u16 = 14617;

/// Largest frame accepted from a server (header included).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
