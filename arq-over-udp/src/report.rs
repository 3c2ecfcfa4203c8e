//! End-of-session statistics.
//!
//! Both reports are plain data with a stable [`std::fmt::Display`] form, so
//! whatever persists or visualises them can replay a session from the ack
//! bitmap and the set of sequence numbers that suffered simulated loss.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::packet::Seq;
use crate::policy::Protocol;

/// Counters kept by [`crate::sender::SenderWindow`] as a session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Distinct packets admitted into the window (first transmissions).
    pub packets_sent: u64,
    /// Transmissions dropped by the loss simulator.
    pub packets_lost: u64,
    /// Transmissions beyond the first for any packet.
    pub retransmissions: u64,
    /// Acks that acknowledged something new.
    pub acks_received: u64,
    /// Duplicate, stale, or out-of-range acks.
    pub stale_acks: u64,
    /// Datagrams that did not decode as an ack.
    pub malformed_acks: u64,
    /// Failed send/receive calls at the transport boundary.
    pub transport_errors: u64,
}

/// Final state of a sender session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub protocol: Protocol,
    pub total_packets: u32,
    pub window_size: u32,
    pub stats: SenderStats,
    pub final_rto: Duration,
    /// `acked[seq]` is true once `seq` was acknowledged.
    pub acked: Vec<bool>,
    /// Sequence numbers with at least one simulated loss.
    pub lost: BTreeSet<Seq>,
}

impl SenderReport {
    pub fn is_complete(&self) -> bool {
        self.acked.iter().all(|&a| a)
    }
}

impl fmt::Display for SenderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Transmission Statistics ===")?;
        writeln!(f, "Protocol: {}", self.protocol)?;
        writeln!(f, "Total Packets: {}", self.total_packets)?;
        writeln!(f, "Window Size: {}", self.window_size)?;
        writeln!(f, "Packets Sent: {}", self.stats.packets_sent)?;
        writeln!(f, "Packets Lost: {}", self.stats.packets_lost)?;
        writeln!(f, "Retransmissions: {}", self.stats.retransmissions)?;
        writeln!(f, "Acks Received: {}", self.stats.acks_received)?;
        writeln!(f, "Stale Acks: {}", self.stats.stale_acks)?;
        writeln!(f, "Malformed Acks: {}", self.stats.malformed_acks)?;
        writeln!(f, "Transport Errors: {}", self.stats.transport_errors)?;
        writeln!(f, "Final RTO: {}ms", self.final_rto.as_millis())?;
        write!(f, "ACK Received:")?;
        for &a in &self.acked {
            write!(f, " {}", u8::from(a))?;
        }
        write!(f, "\nLost Packets:")?;
        for seq in &self.lost {
            write!(f, " {seq}")?;
        }
        writeln!(f)
    }
}

/// Counters kept by [`crate::receiver::ReceiverWindow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Datagrams that decoded cleanly.
    pub packets_received: u64,
    /// Datagrams dropped for a bad checksum or malformed frame.
    pub corrupted: u64,
    /// Clean packets that arrived ahead of the expected sequence number.
    pub out_of_order: u64,
    /// Clean packets already accepted or delivered earlier.
    pub duplicates: u64,
    /// Clean packets beyond the acceptance range; dropped without an ack.
    pub out_of_window: u64,
    /// Packets handed to the application.
    pub delivered: u64,
    pub bytes_delivered: u64,
    pub acks_sent: u64,
    pub transport_errors: u64,
}

impl fmt::Display for ReceiverReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Receiver Statistics ===")?;
        writeln!(f, "Packets received: {}", self.packets_received)?;
        writeln!(f, "Corrupted packets: {}", self.corrupted)?;
        writeln!(f, "Out of order packets: {}", self.out_of_order)?;
        writeln!(f, "Duplicate packets: {}", self.duplicates)?;
        writeln!(f, "Out of window packets: {}", self.out_of_window)?;
        writeln!(f, "Packets delivered: {}", self.delivered)?;
        writeln!(f, "Total bytes received: {}", self.bytes_delivered)?;
        writeln!(f, "Acks sent: {}", self.acks_sent)?;
        writeln!(f, "Transport errors: {}", self.transport_errors)
    }
}
