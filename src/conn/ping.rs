//! Keep-alive ping state machine.
//!
//! While a connection is up the driver polls [`PingState`] whenever its
//! wake-up time passes. A ping goes out every interval; once a ping has been
//! sent, a connection silent for longer than the ping timeout is dead.

use std::time::Duration;

use tokio::time::Instant;

/// What the driver should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    /// Send a keep-alive ping now.
    SendPing,
    /// Nothing heard for too long; drop the connection.
    Dead,
    /// Poll again at this instant.
    WaitUntil(Instant),
    /// Pinging is stopped.
    Idle,
}

/// Ping timer, last-send and last-heard bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct PingState {
    interval: Duration,
    timeout: Duration,
    running: bool,
    next_ping: Option<Instant>,
    last_sent: Option<Instant>,
    last_heard: Option<Instant>,
    rtt: Option<Duration>,
}

impl PingState {
    /// Create a stopped ping state.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            running: false,
            next_ping: None,
            last_sent: None,
            last_heard: None,
            rtt: None,
        }
    }

    /// Start pinging; the first ping goes out one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.running = true;
        self.next_ping = Some(now + self.interval);
        self.last_heard = Some(now);
    }

    /// Stop pinging.
    pub fn stop(&mut self) {
        self.running = false;
        self.next_ping = None;
    }

    /// Whether pinging is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Record that any traffic arrived.
    pub fn on_heard(&mut self, now: Instant) {
        self.last_heard = Some(now);
    }

    /// Record a round-trip measurement from a ping reply.
    pub fn on_pong(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
    }

    /// Last measured round trip.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// When traffic was last heard.
    pub fn last_heard(&self) -> Option<Instant> {
        self.last_heard
    }

    /// When the last ping was sent.
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    fn dead_at(&self) -> Option<Instant> {
        self.last_sent?;
        self.last_heard.map(|heard| heard + self.timeout)
    }

    /// Decide what to do at `now`. Returning [`PingAction::SendPing`] records
    /// the send and schedules the next one.
    pub fn poll(&mut self, now: Instant) -> PingAction {
        if !self.running {
            return PingAction::Idle;
        }

        if let Some(dead_at) = self.dead_at() {
            if now >= dead_at {
                return PingAction::Dead;
            }
        }

        let next_ping = self.next_ping.unwrap_or(now);
        if now >= next_ping {
            self.last_sent = Some(now);
            self.next_ping = Some(now + self.interval);
            return PingAction::SendPing;
        }

        match self.next_wake() {
            Some(wake) => PingAction::WaitUntil(wake),
            None => PingAction::Idle,
        }
    }

    /// Earliest instant [`poll`](Self::poll) has something to do.
    pub fn next_wake(&self) -> Option<Instant> {
        if !self.running {
            return None;
        }
        let next_ping = self.next_ping?;
        Some(match self.dead_at() {
            Some(dead_at) => dead_at.min(next_ping),
            None => next_ping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);
    const TIMEOUT: Duration = Duration::from_secs(300);

    #[test]
    fn test_stopped_is_idle() {
        let mut ping = PingState::new(INTERVAL, TIMEOUT);
        assert_eq!(ping.poll(Instant::now()), PingAction::Idle);
    }

    #[test]
    fn test_pings_every_interval() {
        let mut ping = PingState::new(INTERVAL, TIMEOUT);
        let start = Instant::now();
        ping.start(start);

        assert_eq!(ping.poll(start), PingAction::WaitUntil(start + INTERVAL));
        assert_eq!(ping.poll(start + INTERVAL), PingAction::SendPing);
        assert_eq!(ping.last_sent(), Some(start + INTERVAL));

        ping.on_heard(start + INTERVAL);
        assert_eq!(
            ping.poll(start + INTERVAL),
            PingAction::WaitUntil(start + INTERVAL * 2)
        );
    }

    #[test]
    fn test_silence_past_timeout_is_dead() {
        let mut ping = PingState::new(INTERVAL, TIMEOUT);
        let start = Instant::now();
        ping.start(start);

        let mut now = start;
        let mut sent = 0;
        loop {
            match ping.poll(now) {
                PingAction::SendPing => sent += 1,
                PingAction::WaitUntil(at) => now = at,
                PingAction::Dead => break,
                PingAction::Idle => panic!("ping stopped"),
            }
        }
        assert_eq!(now, start + TIMEOUT);
        assert_eq!(sent, 9);
    }

    #[test]
    fn test_traffic_keeps_alive() {
        let mut ping = PingState::new(INTERVAL, TIMEOUT);
        let start = Instant::now();
        ping.start(start);
        assert_eq!(ping.poll(start + INTERVAL), PingAction::SendPing);

        let heard = start + TIMEOUT - Duration::from_secs(1);
        ping.on_heard(heard);
        assert_ne!(ping.poll(start + TIMEOUT), PingAction::Dead);
        assert_eq!(ping.poll(heard + TIMEOUT), PingAction::Dead);
    }

    #[test]
    fn test_stop() {
        let mut ping = PingState::new(INTERVAL, TIMEOUT);
        let start = Instant::now();
        ping.start(start);
        ping.stop();
        assert!(!ping.is_running());
        assert_eq!(ping.poll(start + TIMEOUT * 2), PingAction::Idle);
    }
}
