//! `arq-over-udp`: reliable, in-order delivery of a fixed sequence of
//! packets over a lossy datagram channel, using Stop-and-Wait, Go-Back-N or
//! Selective Repeat.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐   DATA datagrams   ┌─────────────────┐
//!  │ SenderSession │───────────────────▶│ ReceiverSession │──▶ deliveries
//!  └───────┬───────┘                    └────────┬────────┘    (mpsc)
//!          │◀──────────── ACKs ──────────────────┘
//!          │
//!  ┌───────▼────────┐  ┌────────────────┐
//!  │  SenderWindow  │  │ ReceiverWindow │   pure state machines,
//!  │ + timers + RTO │  │ + SR buffer    │   no I/O, no clocks of their own
//!  └───────┬────────┘  └───────┬────────┘
//!          └──── Protocol ─────┘            ack mode, retransmit scope,
//!                                           timer mode
//!  ┌──────────────────────────────────────┐
//!  │ Transport (UdpTransport | Memory)    │
//!  └──────────────────────────────────────┘
//! ```
//!
//! Modules:
//! - [`packet`]: wire format and checksum
//! - [`policy`]: the three protocol variants and what each one implies
//! - [`state`]: per-packet sender state
//! - [`timer`]: adaptive RTO and retransmission deadlines
//! - [`sender`]: outbound sliding-window state machine
//! - [`receiver`]: inbound state machine and Selective Repeat buffer
//! - [`session`]: async drivers tying the state machines to a transport
//! - [`transport`]: datagram transport trait, UDP and in-memory
//! - [`simulator`]: injected packet loss
//! - [`shutdown`]: cooperative cancellation
//! - [`report`]: per-session statistics
//! - [`config`]: session configuration and validation
//! - [`error`]: session-level errors

pub mod config;
pub mod error;
pub mod packet;
pub mod policy;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod session;
pub mod shutdown;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::SessionConfig;
pub use error::SessionError;
pub use policy::Protocol;
pub use session::{ReceiverSession, SenderSession};
