//! Per-sequence-number sender state.
//!
//! Transitions are driven by [`crate::sender::SenderWindow`]; this module only
//! names the states so tests and logs can talk about them.
//!
//! ```text
//!  UNSENT ──try_send──▶ IN_FLIGHT ──ack──▶ ACKNOWLEDGED
//!                          │   ▲
//!                          └───┘
//!                       timer expiry
//!                     (retransmission)
//! ```

/// Lifecycle of one sequence number at the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Not yet admitted into the window.
    Unsent,
    /// Transmitted at least once; awaiting an ack.
    InFlight,
    /// Covered by an ack.  Terminal.
    Acknowledged,
}

impl Default for PacketState {
    fn default() -> Self {
        Self::Unsent
    }
}

impl std::fmt::Display for PacketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
