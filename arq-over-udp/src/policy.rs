//! ARQ protocol variants.
//!
//! [`Protocol`] is the only thing that differs between Stop-and-Wait,
//! Go-Back-N, and Selective Repeat.  [`crate::sender::SenderWindow`] and
//! [`crate::receiver::ReceiverWindow`] are written once and ask the protocol
//! three questions:
//!
//! | Variant          | capacity | acks       | on timeout resend | timers      |
//! |------------------|----------|------------|-------------------|-------------|
//! | Stop-and-Wait    | 1        | cumulative | the base packet   | one, window |
//! | Go-Back-N        | N        | cumulative | whole window      | one, window |
//! | Selective Repeat | N        | selective  | expired packet    | per packet  |

use std::str::FromStr;

/// Which ARQ discipline a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Protocol {
    #[value(name = "saw", alias = "stop-and-wait")]
    StopAndWait,
    #[value(name = "gbn", alias = "go-back-n")]
    GoBackN,
    #[value(name = "sr", alias = "selective-repeat")]
    SelectiveRepeat,
}

/// How the receiver's acks are to be read by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Ack `N` covers every sequence number `<= N`.
    Cumulative,
    /// Ack `N` covers exactly `N`.
    Selective,
}

/// What the sender resends when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitScope {
    /// Only the packet at `base`.
    Base,
    /// Every unacknowledged packet in `[base, next)`.
    Window,
    /// Only the packet whose own timer expired.
    Single,
}

/// Granularity of retransmission timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// One timer guards the oldest outstanding packet; restarted when `base`
    /// advances.
    PerWindow,
    /// Each outstanding packet owns a timer.
    PerPacket,
}

impl Protocol {
    /// Effective window capacity given the configured size.
    ///
    /// Stop-and-Wait ignores `configured`; the others never go below 1.
    pub fn capacity(self, configured: u32) -> u32 {
        match self {
            Protocol::StopAndWait => 1,
            Protocol::GoBackN | Protocol::SelectiveRepeat => configured.max(1),
        }
    }

    pub fn ack_mode(self) -> AckMode {
        match self {
            Protocol::StopAndWait | Protocol::GoBackN => AckMode::Cumulative,
            Protocol::SelectiveRepeat => AckMode::Selective,
        }
    }

    pub fn retransmit_scope(self) -> RetransmitScope {
        match self {
            Protocol::StopAndWait => RetransmitScope::Base,
            Protocol::GoBackN => RetransmitScope::Window,
            Protocol::SelectiveRepeat => RetransmitScope::Single,
        }
    }

    pub fn timer_mode(self) -> TimerMode {
        match self {
            Protocol::StopAndWait | Protocol::GoBackN => TimerMode::PerWindow,
            Protocol::SelectiveRepeat => TimerMode::PerPacket,
        }
    }

    /// Short tag used in log lines.
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::StopAndWait => "saw",
            Protocol::GoBackN => "gbn",
            Protocol::SelectiveRepeat => "sr",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::GoBackN
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::StopAndWait => "Stop-and-Wait",
            Protocol::GoBackN => "Go-Back-N",
            Protocol::SelectiveRepeat => "Selective Repeat",
        };
        f.write_str(name)
    }
}

/// Returned when a protocol name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0:?} (expected saw, gbn, or sr)")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "saw" | "stop-and-wait" | "1" => Ok(Protocol::StopAndWait),
            "gbn" | "go-back-n" | "2" => Ok(Protocol::GoBackN),
            "sr" | "selective-repeat" | "3" => Ok(Protocol::SelectiveRepeat),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}
