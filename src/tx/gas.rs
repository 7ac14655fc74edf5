//! Bounded fee and gas-limit escalation

use crate::config::TxConfig;

/// Retry budget and growth factor for recoverable rejections
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Applied to the rejected resource before each retry
    pub multiplier: f64,
}

impl EscalationPolicy {
    pub fn new(max_attempts: u32, multiplier: f64) -> Self {
        Self {
            max_attempts,
            multiplier,
        }
    }

    pub fn from_config(config: &TxConfig) -> Self {
        Self::new(config.max_attempts, config.multiplier)
    }

    /// Whether another attempt may follow `attempt` (1-based)
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Next fee after an insufficient-fee rejection
    pub fn escalate_fee(&self, fee: u128) -> u128 {
        (fee as f64 * self.multiplier).ceil() as u128
    }

    /// Next gas limit after an out-of-gas rejection
    pub fn escalate_gas(&self, gas_limit: u64) -> u64 {
        (gas_limit as f64 * self.multiplier).ceil() as u64
    }
}
