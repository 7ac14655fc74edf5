//! Chain module - the RPC boundary to a single Cosmos SDK node
//!
//! This module provides:
//! - The gRPC channel to the configured endpoint (TLS or plaintext)
//! - Account number / sequence and balance queries
//! - Sync-mode broadcast and transaction lookup by hash

pub mod connection;
pub mod provider;

pub use connection::connect;
pub use provider::ChainProvider;

use crate::error::CompounderResult;

use async_trait::async_trait;
use std::collections::BTreeMap;

/// Balances keyed by denom, in smallest units
pub type Balances = BTreeMap<String, u128>;

/// Point-in-time snapshot of the signer's account, fetched right before signing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub account_number: u64,
    pub sequence: u64,
}

/// Node response for a broadcast or a transaction lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTxResponse {
    pub height: i64,
    pub tx_hash: String,
    pub code: u32,
    pub codespace: String,
    pub raw_log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
}

impl ChainTxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Queries and broadcasts issued against the chain node.
///
/// Every call is an independent request; implementations hold no mutable
/// client-side state, so concurrent queries are safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account number and next expected sequence for `address`
    async fn account_state(&self, address: &str) -> CompounderResult<AccountState>;

    /// All balances held by `address`
    async fn balances(&self, address: &str) -> CompounderResult<Balances>;

    /// Submit signed bytes and wait for mempool admission only
    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> CompounderResult<ChainTxResponse>;

    /// Final result of a transaction, `None` while it is not indexed yet
    async fn get_tx(&self, hash: &str) -> CompounderResult<Option<ChainTxResponse>>;
}
