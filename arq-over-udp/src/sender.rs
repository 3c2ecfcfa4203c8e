//! Send-side sliding-window state machine, shared by all three protocols.
//!
//! [`SenderWindow`] owns the outgoing sequence space `[0, total)`, decides
//! what may be transmitted, tracks per-packet acknowledgement, and turns
//! timer expiry into retransmissions.  The [`Protocol`] supplies the window
//! capacity, how acks are read, and what a timeout resends.
//!
//! # Protocol contract
//!
//! - At most `capacity` packets are outstanding: `base <= next <= base + capacity`.
//! - Cumulative acks (`Stop-and-Wait`, `Go-Back-N`): ack `N` with
//!   `base <= N < next` acknowledges `[base, N]`; anything else is stale.
//! - Selective acks (`Selective Repeat`): ack `N` in `[base, next)`
//!   acknowledges exactly `N`; `base` then slides over the acked prefix.
//! - Every packet may be transmitted at most `max_sends` times.  Needing one
//!   more is a [`RetryBudgetExceeded`] failure, never a silent retry loop.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeSet;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ConfigError, SessionConfig};
use crate::packet::{DataPacket, Seq};
use crate::policy::{AckMode, Protocol, RetransmitScope, TimerMode};
use crate::report::{SenderReport, SenderStats};
use crate::state::PacketState;
use crate::timer::{AdaptiveRto, RetransmitTimers, RtoConfig, TimerKey};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An outstanding packet.
#[derive(Debug, Clone)]
pub struct SendRecord {
    /// The encoded packet, ready to hand to the transport again.
    pub datagram: Vec<u8>,
    /// Total number of times this packet has been transmitted.
    pub sends: u32,
}

/// One slot of the sequence space, indexed by sequence number.
#[derive(Debug, Clone)]
enum Slot {
    Unsent(Vec<u8>),
    InFlight(SendRecord),
    Acked,
}

/// A datagram the caller must put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub seq: Seq,
    pub datagram: Vec<u8>,
    /// 1 for the first transmission, 2 for the first retransmission, ...
    pub attempt: u32,
}

impl Transmission {
    pub fn is_retransmission(&self) -> bool {
        self.attempt > 1
    }
}

/// Result of feeding one ack to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack covered `newly_acked` packets that were still outstanding.
    Acked { newly_acked: u32 },
    /// Duplicate, stale, or out-of-range; no state changed.
    Stale,
}

/// A packet would need more than `max_sends` transmissions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("packet {seq} still unacknowledged after {sends} transmissions")]
pub struct RetryBudgetExceeded {
    pub seq: Seq,
    pub sends: u32,
}

// ---------------------------------------------------------------------------
// SenderWindow
// ---------------------------------------------------------------------------

/// Send-side state for one session.
///
/// # Sequence-number layout
///
/// ```text
///    base                 next
///      │                    │
///  ────┼────────────────────┼──────────────┼─────▶ seq space
///  acked│ <── in flight ──▶ │ <─ sendable ─▶│ unsent
///                              base + capacity
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    protocol: Protocol,
    capacity: u32,
    total: u32,
    max_sends: u32,
    base: Seq,
    next: Seq,
    slots: Vec<Slot>,
    timers: RetransmitTimers,
    rto: AdaptiveRto,
    stats: SenderStats,
    lost: BTreeSet<Seq>,
}

impl SenderWindow {
    /// Create a window over `payloads`; payload `i` travels as sequence
    /// number `i`.
    ///
    /// Fails if a payload is too large for one packet or there are more
    /// payloads than sequence numbers.
    pub fn new(
        protocol: Protocol,
        window_size: u32,
        max_sends: u32,
        rto: RtoConfig,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Self, ConfigError> {
        let total =
            u32::try_from(payloads.len()).map_err(|_| ConfigError::TooManyPackets(payloads.len()))?;

        let slots = payloads
            .into_iter()
            .enumerate()
            .map(|(seq, payload)| {
                DataPacket::new(seq as Seq, payload)
                    .encode()
                    .map(Slot::Unsent)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            protocol,
            capacity: protocol.capacity(window_size),
            total,
            max_sends: max_sends.max(1),
            base: 0,
            next: 0,
            slots,
            timers: RetransmitTimers::new(),
            rto: AdaptiveRto::new(rto),
            stats: SenderStats::default(),
            lost: BTreeSet::new(),
        })
    }

    /// Build a window from session parameters.
    pub fn from_config(config: &SessionConfig, payloads: Vec<Vec<u8>>) -> Result<Self, ConfigError> {
        Self::new(
            config.protocol,
            config.window_size,
            config.max_sends,
            config.rto,
            payloads,
        )
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Oldest unacknowledged sequence number (left window edge).
    pub fn base(&self) -> Seq {
        self.base
    }

    /// Sequence number of the next packet to admit.
    pub fn next(&self) -> Seq {
        self.next
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of packets in `[base, next)`.
    pub fn in_flight(&self) -> u32 {
        self.next - self.base
    }

    /// `true` when a new packet may be admitted right now.
    pub fn can_send(&self) -> bool {
        self.next < self.total && self.in_flight() < self.capacity
    }

    /// The session's sole success criterion.
    pub fn is_complete(&self) -> bool {
        self.base == self.total
    }

    pub fn state_of(&self, seq: Seq) -> Option<PacketState> {
        self.slots.get(seq as usize).map(|slot| match slot {
            Slot::Unsent(_) => PacketState::Unsent,
            Slot::InFlight(_) => PacketState::InFlight,
            Slot::Acked => PacketState::Acknowledged,
        })
    }

    /// Transmissions so far of an outstanding packet.
    pub fn sends_of(&self, seq: Seq) -> Option<u32> {
        match self.slots.get(seq as usize) {
            Some(Slot::InFlight(record)) => Some(record.sends),
            _ => None,
        }
    }

    pub fn ack_bitmap(&self) -> Vec<bool> {
        self.slots.iter().map(|s| matches!(s, Slot::Acked)).collect()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn rto(&self) -> &AdaptiveRto {
        &self.rto
    }

    /// Earliest armed retransmission deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Admit every packet the window allows, returning them for transmission.
    ///
    /// Go-Back-N and Stop-and-Wait arm the window timer if it is idle;
    /// Selective Repeat arms one timer per admitted packet.
    pub fn try_send(&mut self, now: Instant) -> Vec<Transmission> {
        let mut out = Vec::new();
        while self.can_send() {
            let seq = self.next;
            let slot = &mut self.slots[seq as usize];
            let datagram = match std::mem::replace(slot, Slot::Acked) {
                Slot::Unsent(datagram) => datagram,
                // Everything at or past `next` is unsent.
                other => {
                    *slot = other;
                    break;
                }
            };
            *slot = Slot::InFlight(SendRecord {
                datagram: datagram.clone(),
                sends: 1,
            });

            match self.protocol.timer_mode() {
                TimerMode::PerWindow => {
                    if !self.timers.is_armed(TimerKey::Window) {
                        self.timers.arm(TimerKey::Window, now, self.rto.current());
                    }
                }
                TimerMode::PerPacket => {
                    self.timers.arm(TimerKey::Packet(seq), now, self.rto.current());
                }
            }

            self.next += 1;
            self.stats.packets_sent += 1;
            out.push(Transmission {
                seq,
                datagram,
                attempt: 1,
            });
        }
        out
    }

    /// Process one ack.
    pub fn on_ack(&mut self, seq: Seq, now: Instant) -> AckOutcome {
        if seq < self.base || seq >= self.next {
            self.stats.stale_acks += 1;
            return AckOutcome::Stale;
        }

        let timely = self.sends_of(seq) == Some(1);
        let old_base = self.base;
        let newly_acked = match self.protocol.ack_mode() {
            AckMode::Cumulative => {
                for s in self.base..=seq {
                    self.slots[s as usize] = Slot::Acked;
                }
                self.base = seq + 1;
                seq + 1 - old_base
            }
            AckMode::Selective => {
                if !matches!(self.slots[seq as usize], Slot::InFlight(_)) {
                    self.stats.stale_acks += 1;
                    return AckOutcome::Stale;
                }
                self.slots[seq as usize] = Slot::Acked;
                self.timers.cancel(TimerKey::Packet(seq));
                while self.base < self.next && matches!(self.slots[self.base as usize], Slot::Acked)
                {
                    self.base += 1;
                }
                1
            }
        };

        self.stats.acks_received += 1;
        if timely {
            self.rto.decrease();
        }

        if self.protocol.timer_mode() == TimerMode::PerWindow && self.base != old_base {
            if self.base < self.next {
                self.timers.arm(TimerKey::Window, now, self.rto.current());
            } else {
                self.timers.cancel(TimerKey::Window);
            }
        }

        AckOutcome::Acked { newly_acked }
    }

    /// Fire every timer due at `now` and return the retransmissions it calls for.
    ///
    /// An empty vector means nothing was due.  The RTO is backed off once per
    /// call that retransmits anything.
    pub fn on_timer_expiry(&mut self, now: Instant) -> Result<Vec<Transmission>, RetryBudgetExceeded> {
        let expired = self.timers.take_expired(now);
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let targets: Vec<Seq> = match self.protocol.retransmit_scope() {
            RetransmitScope::Base => vec![self.base],
            RetransmitScope::Window => (self.base..self.next).collect(),
            RetransmitScope::Single => expired
                .iter()
                .filter_map(|key| match key {
                    TimerKey::Packet(seq) => Some(*seq),
                    TimerKey::Window => None,
                })
                .collect(),
        };
        let targets: Vec<Seq> = targets
            .into_iter()
            .filter(|&seq| self.sends_of(seq).is_some())
            .collect();

        for &seq in &targets {
            if let Some(sends) = self.sends_of(seq) {
                if sends >= self.max_sends {
                    self.timers.cancel_all();
                    return Err(RetryBudgetExceeded { seq, sends });
                }
            }
        }

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        self.rto.back_off();
        let rto = self.rto.current();
        let per_packet = self.protocol.timer_mode() == TimerMode::PerPacket;

        let mut out = Vec::with_capacity(targets.len());
        for seq in targets {
            if let Slot::InFlight(record) = &mut self.slots[seq as usize] {
                record.sends += 1;
                out.push(Transmission {
                    seq,
                    datagram: record.datagram.clone(),
                    attempt: record.sends,
                });
            }
            self.stats.retransmissions += 1;
            if per_packet {
                self.timers.arm(TimerKey::Packet(seq), now, rto);
            }
        }
        if !per_packet {
            self.timers.arm(TimerKey::Window, now, rto);
        }
        Ok(out)
    }

    /// The loss simulator swallowed a transmission of `seq`.
    pub fn record_loss(&mut self, seq: Seq) {
        self.stats.packets_lost += 1;
        self.lost.insert(seq);
    }

    pub fn record_transport_error(&mut self) {
        self.stats.transport_errors += 1;
    }

    pub fn record_malformed_ack(&mut self) {
        self.stats.malformed_acks += 1;
    }

    /// Stop every timer; used when the session is torn down.
    pub fn cancel_timers(&mut self) {
        self.timers.cancel_all();
    }

    pub fn report(&self) -> SenderReport {
        SenderReport {
            protocol: self.protocol,
            total_packets: self.total,
            window_size: self.capacity,
            stats: self.stats.clone(),
            final_rto: self.rto.current(),
            acked: self.ack_bitmap(),
            lost: self.lost.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
