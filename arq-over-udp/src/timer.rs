//! Retransmission timer management.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ack arrives within a bounded time.  This module provides:
//! - [`AdaptiveRto`]: the current retransmission timeout (RTO), halved
//!   toward a floor on timely acks and doubled toward a ceiling on expiry.
//! - [`RetransmitTimers`]: a set of deadlines keyed by [`TimerKey`]: one
//!   window-wide timer for Stop-and-Wait and Go-Back-N, one per packet for
//!   Selective Repeat.
//!
//! Nothing here sleeps; the session's timer task asks for
//! [`RetransmitTimers::next_deadline`] and calls back in when it passes.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::packet::Seq;

/// Bounds for the adaptive RTO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtoConfig {
    /// RTO before any ack has been seen.
    pub initial: Duration,
    /// Floor reached by repeated halving.
    pub min: Duration,
    /// Ceiling reached by repeated back-off.
    pub max: Duration,
}

impl Default for RtoConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            min: Duration::from_millis(100),
            max: Duration::from_millis(5000),
        }
    }
}

/// Current retransmission timeout for one sender.
#[derive(Debug, Clone)]
pub struct AdaptiveRto {
    pub config: RtoConfig,
    current: Duration,
}

impl AdaptiveRto {
    pub fn new(config: RtoConfig) -> Self {
        let current = config.initial.clamp(config.min, config.max);
        Self { config, current }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Halve the RTO on evidence of a timely ack, not going below `min`.
    pub fn decrease(&mut self) {
        self.current = (self.current / 2).max(self.config.min);
    }

    /// Double the RTO on expiry (exponential back-off), capped at `max`.
    pub fn back_off(&mut self) {
        self.current = (self.current * 2).min(self.config.max);
    }
}

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    /// The single timer guarding the oldest unacked packet.
    Window,
    /// The timer of one outstanding packet.
    Packet(Seq),
}

/// Armed deadlines, at most one per key.
#[derive(Debug, Default)]
pub struct RetransmitTimers {
    deadlines: BTreeMap<TimerKey, Instant>,
}

impl RetransmitTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `key` to fire `rto` after `now`.
    pub fn arm(&mut self, key: TimerKey, now: Instant, rto: Duration) {
        self.deadlines.insert(key, now + rto);
    }

    pub fn cancel(&mut self, key: TimerKey) {
        self.deadlines.remove(&key);
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key whose deadline is `<= now`, in key order.
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerKey> {
        let expired: Vec<TimerKey> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&key, _)| key)
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
