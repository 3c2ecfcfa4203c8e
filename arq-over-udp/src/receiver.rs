//! Receive-side state machine, shared by all three protocols.
//!
//! [`ReceiverWindow`] decodes each arriving datagram, decides whether to
//! accept, buffer, or discard it, picks the ack to send back, and releases
//! payloads to the application strictly in sequence order.
//!
//! - **Cumulative** (Stop-and-Wait, Go-Back-N): only `seq == expected` is
//!   accepted.  Anything else is discarded without buffering and the last
//!   in-order sequence number (`expected - 1`) is re-acked so the sender can
//!   see the gap.
//! - **Selective** (Selective Repeat): anything in
//!   `[expected, expected + capacity)` is buffered once and acked
//!   individually; a run of accepted slots starting at `expected` is then
//!   delivered in one step.  Arrivals below `expected` are re-acked, never
//!   re-buffered.
//!
//! Corrupted datagrams are counted and dropped without an ack; the sender's
//! timer recovers them.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use crate::config::SessionConfig;
use crate::packet::{DataPacket, Seq};
use crate::policy::{AckMode, Protocol};
use crate::report::ReceiverReport;

/// A payload released to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub seq: Seq,
    pub payload: Vec<u8>,
}

/// What the caller must do after one datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Ack to send back, if any.
    pub ack: Option<Seq>,
    /// Payloads now deliverable, in sequence order.
    pub delivered: Vec<Delivery>,
}

/// One selective-repeat reassembly slot.
#[derive(Debug, Clone, Default)]
struct ReceiveRecord {
    payload: Vec<u8>,
    accepted: bool,
}

// ---------------------------------------------------------------------------
// ReceiverWindow
// ---------------------------------------------------------------------------

/// Receive-side state for one session.
#[derive(Debug)]
pub struct ReceiverWindow {
    protocol: Protocol,
    capacity: u32,
    total: u32,
    /// Next sequence number owed to the application.
    expected: Seq,
    /// Ring of `capacity` slots addressed by `seq % capacity`; only used by
    /// selective acks.
    slots: Vec<ReceiveRecord>,
    report: ReceiverReport,
}

impl ReceiverWindow {
    pub fn new(protocol: Protocol, window_size: u32, total: u32) -> Self {
        let capacity = protocol.capacity(window_size);
        let slots = match protocol.ack_mode() {
            AckMode::Selective => vec![ReceiveRecord::default(); capacity as usize],
            AckMode::Cumulative => Vec::new(),
        };
        Self {
            protocol,
            capacity,
            total,
            expected: 0,
            slots,
            report: ReceiverReport::default(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.protocol, config.window_size, config.total_packets)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn expected(&self) -> Seq {
        self.expected
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Every sequence number has been delivered.
    pub fn is_complete(&self) -> bool {
        self.expected >= self.total
    }

    /// Sequence numbers accepted but not yet delivered, ascending.
    pub fn buffered(&self) -> Vec<Seq> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        let end = self.window_end();
        (self.expected..end)
            .filter(|&seq| self.slots[self.slot_index(seq)].accepted)
            .collect()
    }

    pub fn report(&self) -> &ReceiverReport {
        &self.report
    }

    pub fn record_ack_sent(&mut self) {
        self.report.acks_sent += 1;
    }

    pub fn record_transport_error(&mut self) {
        self.report.transport_errors += 1;
    }

    /// Process one raw datagram.
    pub fn on_datagram(&mut self, datagram: &[u8]) -> ReceiveOutcome {
        let packet = match DataPacket::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.report.corrupted += 1;
                log::debug!("[receiver] dropping corrupted datagram: {e}");
                return ReceiveOutcome::default();
            }
        };
        self.report.packets_received += 1;

        if packet.seq >= self.total {
            self.report.out_of_window += 1;
            log::debug!("[receiver] seq={} beyond total={}", packet.seq, self.total);
            return ReceiveOutcome::default();
        }
        // Arrivals below `expected` are counted as duplicates instead.
        if packet.seq > self.expected {
            self.report.out_of_order += 1;
        }

        match self.protocol.ack_mode() {
            AckMode::Cumulative => self.on_cumulative(packet),
            AckMode::Selective => self.on_selective(packet),
        }
    }

    fn on_cumulative(&mut self, packet: DataPacket) -> ReceiveOutcome {
        if packet.seq == self.expected {
            self.expected += 1;
            let delivered = vec![self.deliver(packet.seq, packet.payload)];
            return ReceiveOutcome {
                ack: Some(packet.seq),
                delivered,
            };
        }

        if packet.seq < self.expected {
            self.report.duplicates += 1;
        }
        log::debug!(
            "[receiver] discarding seq={} expected={}",
            packet.seq,
            self.expected
        );
        ReceiveOutcome {
            ack: self.expected.checked_sub(1),
            delivered: Vec::new(),
        }
    }

    fn on_selective(&mut self, packet: DataPacket) -> ReceiveOutcome {
        let seq = packet.seq;
        if seq < self.expected {
            self.report.duplicates += 1;
            return ReceiveOutcome {
                ack: Some(seq),
                delivered: Vec::new(),
            };
        }
        if seq >= self.window_end() {
            self.report.out_of_window += 1;
            return ReceiveOutcome::default();
        }

        let idx = self.slot_index(seq);
        let slot = &mut self.slots[idx];
        if slot.accepted {
            self.report.duplicates += 1;
        } else {
            slot.payload = packet.payload;
            slot.accepted = true;
        }

        let mut delivered = Vec::new();
        loop {
            let idx = self.slot_index(self.expected);
            if self.expected >= self.total || !self.slots[idx].accepted {
                break;
            }
            let record = std::mem::take(&mut self.slots[idx]);
            let seq = self.expected;
            self.expected += 1;
            delivered.push(self.deliver(seq, record.payload));
        }

        ReceiveOutcome {
            ack: Some(seq),
            delivered,
        }
    }

    fn deliver(&mut self, seq: Seq, payload: Vec<u8>) -> Delivery {
        self.report.delivered += 1;
        self.report.bytes_delivered += payload.len() as u64;
        log::debug!("[receiver] delivering seq={seq} len={}", payload.len());
        Delivery { seq, payload }
    }

    /// One past the last acceptable sequence number.
    fn window_end(&self) -> Seq {
        self.expected
            .saturating_add(self.capacity)
            .min(self.total)
    }

    fn slot_index(&self, seq: Seq) -> usize {
        (seq % self.capacity) as usize
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
