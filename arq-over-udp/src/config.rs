//! Session parameters.
//!
//! Both peers must agree on the protocol, total packet count, and window
//! size; nothing in the wire format carries them.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{PacketError, MAX_PAYLOAD};
use crate::policy::Protocol;
use crate::simulator::SimulatorConfig;
use crate::timer::RtoConfig;

/// Port both binaries default to.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bound on one blocking receive, in milliseconds.
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 1000;

/// Default number of consecutive idle receives before a receiver stops.
///
/// With the default RTO ceiling and retry budget, the resulting idle window
/// outlasts the longest silence a sender can produce while still retrying.
pub const DEFAULT_MAX_IDLE_TIMEOUTS: u32 = 30;

/// Default transmissions per packet, first send included.
pub const DEFAULT_MAX_SENDS: u32 = 7;

/// Everything needed to run one sender or receiver session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub protocol: Protocol,
    /// Number of packets in the session; sequence numbers are `[0, total)`.
    pub total_packets: u32,
    /// Window size N.  Forced to 1 for Stop-and-Wait.
    pub window_size: u32,
    /// Where the sender sends packets.
    pub peer: SocketAddr,
    /// Where the receiver listens.
    pub bind: SocketAddr,
    pub rto: RtoConfig,
    /// Maximum transmissions of one packet, first send included.
    pub max_sends: u32,
    /// Upper bound on any single blocking receive.
    pub recv_timeout: Duration,
    /// Consecutive idle or failed receives after which the receiver stops.
    pub max_idle_timeouts: u32,
    /// Capacity of the receiver → application delivery queue.
    pub delivery_queue: usize,
    /// Bytes in each generated payload.
    pub payload_size: usize,
    pub simulator: SimulatorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            total_packets: 10,
            window_size: 4,
            peer: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            rto: RtoConfig::default(),
            max_sends: DEFAULT_MAX_SENDS,
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
            max_idle_timeouts: DEFAULT_MAX_IDLE_TIMEOUTS,
            delivery_queue: 1000,
            payload_size: 64,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Window capacity after the protocol has had its say.
    pub fn effective_window(&self) -> u32 {
        self.protocol.capacity(self.window_size)
    }

    /// How long a receiver keeps listening without hearing anything.
    pub fn idle_window(&self) -> Duration {
        self.recv_timeout.saturating_mul(self.max_idle_timeouts)
    }

    /// Longest gap between datagrams from a sender that is still inside its
    /// retry budget: every attempt but the last lost, each after a full
    /// backed-off RTO.
    pub fn worst_case_silence(&self) -> Duration {
        self.rto.max.saturating_mul(self.max_sends.saturating_sub(1))
    }

    /// Reject parameter combinations no session can run with.
    ///
    /// A receiver whose idle window is shorter than one maximal RTO would
    /// give up while the sender is still legitimately waiting to retransmit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != Protocol::StopAndWait && self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_sends == 0 {
            return Err(ConfigError::ZeroRetryBudget);
        }
        if self.rto.min.is_zero() || self.rto.min > self.rto.max {
            return Err(ConfigError::RtoBounds {
                min: self.rto.min,
                max: self.rto.max,
            });
        }
        if self.recv_timeout.is_zero() {
            return Err(ConfigError::ZeroRecvTimeout);
        }
        if self.max_idle_timeouts == 0 {
            return Err(ConfigError::ZeroIdleTimeouts);
        }
        if self.idle_window() < self.rto.max {
            return Err(ConfigError::IdleWindowTooShort {
                idle: self.idle_window(),
                rto_max: self.rto.max,
            });
        }
        if self.delivery_queue == 0 {
            return Err(ConfigError::ZeroDeliveryQueue);
        }
        if self.payload_size > MAX_PAYLOAD {
            return Err(ConfigError::Packet(PacketError::PayloadTooLarge(
                self.payload_size,
            )));
        }
        if !(0.0..1.0).contains(&self.simulator.loss_rate) {
            return Err(ConfigError::LossRate(self.simulator.loss_rate));
        }
        Ok(())
    }

    /// Generated payload for `seq`: a readable tag padded to `payload_size`.
    pub fn payload_for(&self, seq: u32) -> Vec<u8> {
        let mut payload = format!("packet {seq}").into_bytes();
        payload.resize(self.payload_size.max(payload.len()), b'.');
        payload.truncate(self.payload_size.max(1));
        payload
    }

    /// Payloads for the whole session.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        (0..self.total_packets).map(|seq| self.payload_for(seq)).collect()
    }
}

/// Invalid session parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("max_sends must be at least 1")]
    ZeroRetryBudget,
    #[error("invalid RTO bounds: min {min:?}, max {max:?}")]
    RtoBounds { min: Duration, max: Duration },
    #[error("receive timeout must be non-zero")]
    ZeroRecvTimeout,
    #[error("max_idle_timeouts must be at least 1")]
    ZeroIdleTimeouts,
    #[error("receiver idle window {idle:?} is shorter than the RTO ceiling {rto_max:?}")]
    IdleWindowTooShort { idle: Duration, rto_max: Duration },
    #[error("delivery queue must hold at least one packet")]
    ZeroDeliveryQueue,
    #[error("loss rate {0} outside [0, 1)")]
    LossRate(f64),
    #[error("{0} packets exceed the sequence space")]
    TooManyPackets(usize),
    #[error(transparent)]
    Packet(#[from] PacketError),
}
