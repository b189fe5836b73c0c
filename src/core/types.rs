//! Identifiers shared by every layer.

use std::fmt;

/// The four server roles the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Account and vault server.
    Auth,
    /// Game (age instance) server.
    Game,
    /// File / patcher server.
    File,
    /// GateKeeper, the entry point that hands out server addresses.
    GateKeeper,
}

impl Protocol {
    /// All roles, in index order.
    pub const ALL: [Protocol; 4] = [
        Protocol::Auth,
        Protocol::Game,
        Protocol::File,
        Protocol::GateKeeper,
    ];

    /// Dense index for per-role arrays.
    pub fn index(self) -> usize {
        match self {
            Protocol::Auth => 0,
            Protocol::Game => 1,
            Protocol::File => 2,
            Protocol::GateKeeper => 3,
        }
    }

    /// Connection type byte sent in the connect preamble.
    pub fn conn_type(self) -> u8 {
        match self {
            Protocol::Auth => 10,
            Protocol::Game => 11,
            Protocol::File => 16,
            Protocol::GateKeeper => 22,
        }
    }

    /// Whether the role performs the register handshake before it is usable.
    pub fn requires_register(self) -> bool {
        matches!(self, Protocol::Auth | Protocol::GateKeeper)
    }

    /// Short lowercase name, used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Auth => "auth",
            Protocol::Game => "game",
            Protocol::File => "file",
            Protocol::GateKeeper => "gatekeeper",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Correlation id linking a request to its reply. Zero means unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransId(pub u32);

impl TransId {
    /// The id carried by unsolicited and fire-and-forget messages.
    pub const UNSOLICITED: TransId = TransId(0);

    /// Whether this id marks unsolicited traffic.
    pub fn is_unsolicited(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one connection object (one socket session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u32);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic tag naming a transaction type (e.g. `"file.build_id"`).
pub type TransType = &'static str;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransState {
    /// Waiting for a usable connection.
    WaitServerConnect,
    /// Request sent; waiting for the reply.
    WaitServerResponse,
    /// Terminal; result is final.
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_index_is_dense() {
        for (i, p) in Protocol::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn test_register_roles() {
        assert!(Protocol::Auth.requires_register());
        assert!(Protocol::GateKeeper.requires_register());
        assert!(!Protocol::File.requires_register());
        assert!(!Protocol::Game.requires_register());
    }

    #[test]
    fn test_unsolicited_trans_id() {
        assert!(TransId::UNSOLICITED.is_unsolicited());
        assert!(!TransId(7).is_unsolicited());
    }
}
