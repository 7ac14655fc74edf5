//! Execute messages understood by the compounder contract

use super::stake::StakeAssignment;

use serde::Serialize;

/// Contract entry points called by the agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    /// Withdraw accumulated staking rewards
    ClaimRewards {},

    /// Stake across validators, split by weight
    Stake { stake_msgs: Vec<StakeAssignment> },
}

impl ExecuteMsg {
    /// Operation label used in logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            ExecuteMsg::ClaimRewards {} => "claim_rewards",
            ExecuteMsg::Stake { .. } => "stake",
        }
    }
}
