//! Settlement decision strategies. The worker only sees `SettlementOracle`,
//! so a real gateway integration replaces `WeightedRandomOracle` without
//! touching the pipeline.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::PaymentStatus;

pub const DEFAULT_SUCCESS_RATIO: f64 = 0.8;

pub trait SettlementOracle: Send + Sync {
    fn decide(&self, current: PaymentStatus) -> PaymentStatus;
}

/// Mock gateway: `paid` with probability `success_ratio`, `failed` otherwise.
/// Ignores the current status, so re-settling can give a different answer.
#[derive(Debug, Clone)]
pub struct WeightedRandomOracle {
    success_ratio: f64,
}

impl WeightedRandomOracle {
    pub fn new(success_ratio: f64) -> Self {
        Self { success_ratio: success_ratio.clamp(0.0, 1.0) }
    }
}

impl Default for WeightedRandomOracle {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_RATIO)
    }
}

impl SettlementOracle for WeightedRandomOracle {
    fn decide(&self, _current: PaymentStatus) -> PaymentStatus {
        if rand::thread_rng().gen_bool(self.success_ratio) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        }
    }
}

/// Always answers the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle(pub PaymentStatus);

impl SettlementOracle for FixedOracle {
    fn decide(&self, _current: PaymentStatus) -> PaymentStatus {
        self.0
    }
}

/// Replays a scripted sequence, then falls back to a fixed answer.
#[derive(Debug)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<PaymentStatus>>,
    fallback: PaymentStatus,
}

impl ScriptedOracle {
    pub fn new(script: impl IntoIterator<Item = PaymentStatus>, fallback: PaymentStatus) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
        }
    }
}

impl SettlementOracle for ScriptedOracle {
    fn decide(&self, _current: PaymentStatus) -> PaymentStatus {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
