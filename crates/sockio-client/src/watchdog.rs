//! Heartbeat liveness tracking.

use std::time::{Duration, Instant};

/// What the engine should do after a watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    /// Nothing due.
    Idle,
    /// It is this client's turn to send a heartbeat.
    Heartbeat,
    /// Nothing was received within the timeout; the connection is dead.
    Expired,
}

/// Tracks time since the last inbound packet and paces outbound heartbeats.
///
/// The tick interval is `timeout / ticks_per_timeout`, so a window always
/// spans at least two ticks.
#[derive(Debug, Clone)]
pub struct Watchdog {
    ticks_per_timeout: u32,
    timeout: Option<Duration>,
    running: bool,
    last_received: Option<Instant>,
    last_sent: Option<Instant>,
}

impl Watchdog {
    pub fn new(ticks_per_timeout: u32) -> Self {
        Self {
            ticks_per_timeout: ticks_per_timeout.max(2),
            timeout: None,
            running: false,
            last_received: None,
            last_sent: None,
        }
    }

    /// Set the heartbeat timeout; `None` disables the watchdog.
    pub fn configure(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Period between ticks, if heartbeats are enabled.
    pub fn interval(&self) -> Option<Duration> {
        self.timeout.map(|t| t / self.ticks_per_timeout)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, now: Instant) {
        if self.timeout.is_none() {
            return;
        }
        self.running = true;
        self.last_received = Some(now);
        self.last_sent = None;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.last_received = None;
        self.last_sent = None;
    }

    pub fn record_received(&mut self, now: Instant) {
        if self.running {
            self.last_received = Some(now);
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        if self.running {
            self.last_sent = Some(now);
        }
    }

    /// Evaluate liveness at `now`. Expiry stops the watchdog.
    pub fn tick(&mut self, now: Instant) -> WatchdogTick {
        let (Some(timeout), Some(interval), Some(last_received)) =
            (self.timeout, self.interval(), self.last_received)
        else {
            return WatchdogTick::Idle;
        };
        if !self.running {
            return WatchdogTick::Idle;
        }

        if now.saturating_duration_since(last_received) >= timeout {
            self.stop();
            return WatchdogTick::Expired;
        }

        let due = self
            .last_sent
            .is_none_or(|sent| now.saturating_duration_since(sent) >= interval);
        if due {
            WatchdogTick::Heartbeat
        } else {
            WatchdogTick::Idle
        }
    }
}
