//! Simulated packet loss for exercising the retransmission paths.
//!
//! Loss is injected on the sender's transmit path: before a datagram is
//! handed to the transport, the session asks its [`LossModel`] whether this
//! attempt should vanish.  A dropped attempt is recorded in the sender report
//! (count and sequence number) exactly as if the network had eaten it.
//!
//! | Model            | Behaviour                                          |
//! |------------------|----------------------------------------------------|
//! | [`NoLoss`]       | Transparent pass-through.                          |
//! | [`RandomLoss`]   | Drop each attempt with probability `loss_rate`.    |
//! | [`ScriptedLoss`] | Drop the first `k` attempts of chosen sequence     |
//! |                  | numbers; fully deterministic.                      |

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Seq;

/// Configuration for the random loss model.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0)` that any transmission is dropped.
    pub loss_rate: f64,
    /// Seed for reproducible runs; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            seed: None,
        }
    }
}

/// Decides whether a transmission attempt is lost.
pub trait LossModel: Send + 'static {
    /// `attempt` is 1 for the first transmission of `seq`.
    fn should_drop(&mut self, seq: Seq, attempt: u32) -> bool;
}

/// Never drops anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn should_drop(&mut self, _seq: Seq, _attempt: u32) -> bool {
        false
    }
}

/// Independent Bernoulli loss per attempt.
#[derive(Debug)]
pub struct RandomLoss {
    loss_rate: f64,
    rng: StdRng,
}

impl RandomLoss {
    pub fn new(loss_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(config.loss_rate, config.seed)
    }
}

impl LossModel for RandomLoss {
    fn should_drop(&mut self, _seq: Seq, _attempt: u32) -> bool {
        self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate
    }
}

/// Drops the first `k` attempts of selected sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoss {
    drops: HashMap<Seq, u32>,
}

impl ScriptedLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lose the first `times` transmissions of `seq`.
    pub fn drop_first(mut self, seq: Seq, times: u32) -> Self {
        self.drops.insert(seq, times);
        self
    }
}

impl LossModel for ScriptedLoss {
    fn should_drop(&mut self, seq: Seq, attempt: u32) -> bool {
        self.drops.get(&seq).is_some_and(|&times| attempt <= times)
    }
}
