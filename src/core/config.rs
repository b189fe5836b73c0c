//! Client configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use uuid::Uuid;

use super::constants;
use super::error::ClientError;
use super::types::Protocol;

/// Identity of the client build, carried in every connect preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductInfo {
    /// Client build number.
    pub build_id: u32,
    /// Build flavour (e.g. live vs. test).
    pub build_type: u32,
    /// Branch the build was made from.
    pub branch_id: u32,
    /// Product uuid.
    pub product_id: Uuid,
}

impl Default for ProductInfo {
    fn default() -> Self {
        Self {
            build_id: 0,
            build_type: 0,
            branch_id: 1,
            product_id: Uuid::nil(),
        }
    }
}

/// Per-role behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolSettings {
    /// Reconnect automatically after drops and failed connects.
    pub auto_reconnect: bool,
    /// Send keep-alive pings and enforce the ping timeout.
    pub ping_enabled: bool,
}

impl ProtocolSettings {
    /// Defaults for a role. The game server connection is never re-established
    /// behind the caller's back; every other role reconnects.
    pub fn defaults_for(protocol: Protocol) -> Self {
        Self {
            auto_reconnect: protocol != Protocol::Game,
            ping_enabled: true,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Upper bound on the delay between two connect attempts.
    pub max_reconnect_interval: Duration,
    /// Delay before reconnecting a long-lived registered session.
    pub quick_reconnect_delay: Duration,
    /// Sessions shorter than this count as immediate disconnects.
    pub min_valid_connection: Duration,
    /// Consecutive immediate disconnects before giving up.
    pub max_immediate_disconnects: u32,
    /// Consecutive failed connects before giving up.
    pub max_failed_connects: u32,
    /// Keep-alive ping interval.
    pub ping_interval: Duration,
    /// Silence after which a connection is declared dead.
    pub ping_timeout: Duration,
    /// Time allowed for a connect attempt to complete.
    pub disconnected_timeout: Duration,
    /// Default transaction deadline.
    pub trans_timeout: Duration,
    /// Port appended to bare server names.
    pub default_port: u16,
    /// Largest inbound frame accepted.
    pub max_frame_size: usize,
    /// Server type sent in the File connect preamble.
    pub file_server_type: u32,
    /// Build identity.
    pub product: ProductInfo,
    /// Per-role switches, indexed by [`Protocol::index`].
    pub protocols: [ProtocolSettings; 4],
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_reconnect_interval: constants::MAX_RECONNECT_INTERVAL,
            quick_reconnect_delay: constants::QUICK_RECONNECT_DELAY,
            min_valid_connection: constants::MIN_VALID_CONNECTION,
            max_immediate_disconnects: constants::MAX_IMMEDIATE_DISCONNECTS,
            max_failed_connects: constants::MAX_FAILED_CONNECTS,
            ping_interval: constants::PING_INTERVAL,
            ping_timeout: constants::PING_TIMEOUT,
            disconnected_timeout: constants::DISCONNECTED_TIMEOUT,
            trans_timeout: constants::DEFAULT_TRANS_TIMEOUT,
            default_port: constants::DEFAULT_CLIENT_PORT,
            max_frame_size: constants::MAX_FRAME_SIZE,
            file_server_type: 0,
            product: ProductInfo::default(),
            protocols: Protocol::ALL.map(ProtocolSettings::defaults_for),
        }
    }
}

impl NetConfig {
    /// Settings for one role.
    pub fn protocol(&self, protocol: Protocol) -> ProtocolSettings {
        self.protocols[protocol.index()]
    }

    /// Check the tunables are coherent.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.ping_interval.is_zero() {
            return Err(ClientError::InvalidConfig("ping_interval must be non-zero".into()));
        }
        if self.ping_timeout < self.ping_interval {
            return Err(ClientError::InvalidConfig(
                "ping_timeout must be at least ping_interval".into(),
            ));
        }
        if self.trans_timeout.is_zero() {
            return Err(ClientError::InvalidConfig("trans_timeout must be non-zero".into()));
        }
        if self.max_reconnect_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "max_reconnect_interval must be non-zero".into(),
            ));
        }
        if self.max_frame_size < crate::wire::sizes::HEADER_SIZE {
            return Err(ClientError::InvalidConfig(
                "max_frame_size is smaller than a frame header".into(),
            ));
        }
        Ok(())
    }

    /// Append the default port to `addr` unless it already has one.
    pub fn endpoint(&self, addr: &str) -> String {
        with_default_port(addr, self.default_port)
    }
}

/// Append `port` to a host name or bare IP that does not carry one.
pub fn with_default_port(addr: &str, port: u16) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{addr}:{port}"),
    }
}

/// Builder for [`NetConfig`].
#[derive(Debug, Default)]
pub struct NetConfigBuilder {
    config: NetConfig,
}

impl NetConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum reconnect interval.
    pub fn max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.max_reconnect_interval = interval;
        self
    }

    /// Set the quick reconnect delay.
    pub fn quick_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.quick_reconnect_delay = delay;
        self
    }

    /// Set the minimum session length that counts as a valid connection.
    pub fn min_valid_connection(mut self, duration: Duration) -> Self {
        self.config.min_valid_connection = duration;
        self
    }

    /// Set the immediate-disconnect threshold.
    pub fn max_immediate_disconnects(mut self, count: u32) -> Self {
        self.config.max_immediate_disconnects = count;
        self
    }

    /// Set the failed-connect threshold.
    pub fn max_failed_connects(mut self, count: u32) -> Self {
        self.config.max_failed_connects = count;
        self
    }

    /// Set the ping interval. The ping timeout becomes ten intervals and the
    /// disconnected timeout one interval; override them afterwards if needed.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self.config.ping_timeout = interval * 10;
        self.config.disconnected_timeout = interval;
        self
    }

    /// Set the ping timeout.
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Set the connect-attempt timeout.
    pub fn disconnected_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnected_timeout = timeout;
        self
    }

    /// Set the default transaction timeout.
    pub fn trans_timeout(mut self, timeout: Duration) -> Self {
        self.config.trans_timeout = timeout;
        self
    }

    /// Set the port appended to bare server names.
    pub fn default_port(mut self, port: u16) -> Self {
        self.config.default_port = port;
        self
    }

    /// Set the largest accepted inbound frame.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the File server type.
    pub fn file_server_type(mut self, server_type: u32) -> Self {
        self.config.file_server_type = server_type;
        self
    }

    /// Set the build identity.
    pub fn product(mut self, product: ProductInfo) -> Self {
        self.config.product = product;
        self
    }

    /// Enable or disable auto reconnect for one role.
    pub fn auto_reconnect(mut self, protocol: Protocol, enabled: bool) -> Self {
        self.config.protocols[protocol.index()].auto_reconnect = enabled;
        self
    }

    /// Enable or disable keep-alive pings for one role.
    pub fn ping_enabled(mut self, protocol: Protocol, enabled: bool) -> Self {
        self.config.protocols[protocol.index()].ping_enabled = enabled;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<NetConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_timeout, config.ping_interval * 10);
        assert_eq!(config.disconnected_timeout, config.ping_interval);
        assert_eq!(config.trans_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_game_does_not_reconnect_by_default() {
        let config = NetConfig::default();
        assert!(!config.protocol(Protocol::Game).auto_reconnect);
        assert!(config.protocol(Protocol::Auth).auto_reconnect);
        assert!(config.protocol(Protocol::File).auto_reconnect);
        assert!(config.protocol(Protocol::GateKeeper).auto_reconnect);
    }

    #[test]
    fn test_builder_ping_interval_derives_timeouts() {
        let config = NetConfigBuilder::new()
            .ping_interval(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.ping_timeout, Duration::from_secs(20));
        assert_eq!(config.disconnected_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_builder_rejects_short_ping_timeout() {
        let result = NetConfigBuilder::new()
            .ping_interval(Duration::from_secs(10))
            .ping_timeout(Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("10.0.0.1", 14617), "10.0.0.1:14617");
        assert_eq!(with_default_port("10.0.0.1:80", 14617), "10.0.0.1:80");
        assert_eq!(with_default_port("gk.example.net", 14617), "gk.example.net:14617");
        assert_eq!(with_default_port("gk.example.net:9000", 14617), "gk.example.net:9000");
        assert_eq!(with_default_port("::1", 14617), "[::1]:14617");
    }
}
