//! Reconnect state machine.
//!
//! Pure bookkeeping: the role driver feeds it attempt/connect/drop events
//! with the current time and acts on the returned [`ReconnectDecision`].

use std::time::Duration;

use tokio::time::Instant;

use crate::core::{NetConfig, NetError, Protocol};

/// Reconnect tunables for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect at all. When off, every drop or failure gives up.
    pub enabled: bool,
    /// Upper bound on any retry delay.
    pub max_interval: Duration,
    /// Delay after a long-lived session drops.
    pub quick_delay: Duration,
    /// Sessions at most this long count as immediate disconnects.
    pub min_valid_connection: Duration,
    /// Immediate-disconnect threshold.
    pub max_immediate_disconnects: u32,
    /// Failed-connect threshold.
    pub max_failed_connects: u32,
}

impl ReconnectPolicy {
    /// Policy for `protocol` under `config`.
    pub fn from_config(config: &NetConfig, protocol: Protocol) -> Self {
        Self {
            enabled: config.protocol(protocol).auto_reconnect,
            max_interval: config.max_reconnect_interval,
            quick_delay: config.quick_reconnect_delay.min(config.max_reconnect_interval),
            min_valid_connection: config.min_valid_connection,
            max_immediate_disconnects: config.max_immediate_disconnects,
            max_failed_connects: config.max_failed_connects,
        }
    }

    /// Backoff after `failures` consecutive failed connects, capped at
    /// `max_interval`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.quick_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_interval)
    }
}

/// What the driver should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Start the next attempt at this instant.
    RetryAt(Instant),
    /// Stop trying and report this error once.
    GiveUp(NetError),
}

/// Counters and timestamps that survive across connection objects.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt_started: Option<Instant>,
    connected_at: Option<Instant>,
    immediate_disconnects: u32,
    failed_connects: u32,
}

impl ReconnectState {
    /// Fresh state.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt_started: None,
            connected_at: None,
            immediate_disconnects: 0,
            failed_connects: 0,
        }
    }

    /// Policy in effect.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Consecutive immediate disconnects so far.
    pub fn immediate_disconnects(&self) -> u32 {
        self.immediate_disconnects
    }

    /// Consecutive failed connects so far.
    pub fn failed_connects(&self) -> u32 {
        self.failed_connects
    }

    /// Clear counters, e.g. when the application asks for a fresh connect.
    pub fn reset(&mut self) {
        self.attempt_started = None;
        self.connected_at = None;
        self.immediate_disconnects = 0;
        self.failed_connects = 0;
    }

    /// A connect attempt is starting.
    pub fn on_attempt(&mut self, now: Instant) {
        self.attempt_started = Some(now);
        self.connected_at = None;
    }

    /// The socket opened.
    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.failed_connects = 0;
    }

    /// The attempt failed or did not complete in time.
    pub fn on_connect_failed(&mut self, now: Instant) -> ReconnectDecision {
        self.connected_at = None;
        if !self.policy.enabled {
            return ReconnectDecision::GiveUp(NetError::ConnectFailed);
        }

        self.failed_connects += 1;
        if self.failed_connects >= self.policy.max_failed_connects {
            return ReconnectDecision::GiveUp(NetError::ConnectFailed);
        }

        let delay = self.policy.backoff(self.failed_connects);
        let at = self.attempt_started.map_or(now, |start| start + delay);
        ReconnectDecision::RetryAt(at.clamp(now, now + delay))
    }

    /// An open session dropped.
    pub fn on_disconnect(&mut self, now: Instant) -> ReconnectDecision {
        let Some(connected_at) = self.connected_at.take() else {
            return self.on_connect_failed(now);
        };
        if !self.policy.enabled {
            return ReconnectDecision::GiveUp(NetError::Disconnected);
        }

        if now.saturating_duration_since(connected_at) > self.policy.min_valid_connection {
            self.immediate_disconnects = 0;
            return ReconnectDecision::RetryAt(now + self.policy.quick_delay);
        }

        self.immediate_disconnects += 1;
        if self.immediate_disconnects >= self.policy.max_immediate_disconnects {
            return ReconnectDecision::GiveUp(NetError::Disconnected);
        }
        ReconnectDecision::RetryAt(now + self.policy.max_interval)
    }
}
