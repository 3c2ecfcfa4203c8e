//! Errors that end a sender or receiver session.
//!
//! Packet-level problems never show up here: corrupted datagrams are
//! [`crate::packet::PacketError`]s that the receiver drops, and stale acks are
//! [`crate::sender::AckOutcome::Stale`].  Transport failures are counted and
//! retried inside the session; they only surface when setting the session up.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::packet::Seq;
use crate::sender::RetryBudgetExceeded;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("delivery failed: {0}")]
    RetryBudgetExceeded(#[from] RetryBudgetExceeded),

    #[error("session cancelled")]
    Cancelled,

    #[error("peer went idle before sequence number {expected} was delivered")]
    PeerIdle { expected: Seq },

    #[error("application stopped consuming deliveries")]
    DeliveryClosed,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("session task failed: {0}")]
    Task(String),
}

impl SessionError {
    /// `true` for the one condition that means data could not be delivered.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, SessionError::RetryBudgetExceeded(_))
    }
}
