//! Broadcast-and-confirm with bounded fee / gas escalation

use super::builder::{SignedTx, TxBuilder, TxRequest};
use super::gas::EscalationPolicy;
use crate::chain::{ChainClient, ChainTxResponse};
use crate::config::TxConfig;
use crate::error::{CompounderError, CompounderResult, Rejection, TxStage};
use crate::metrics;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Successful execution of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub height: i64,
    pub tx_hash: String,
    pub gas_used: i64,
    /// Attempts it took, including the successful one
    pub attempts: u32,
}

/// Signs, submits and confirms transactions for one signer
pub struct TransactionSender<C> {
    /// Chain RPC boundary
    client: Arc<C>,
    /// Transaction builder
    builder: TxBuilder,
    /// Retry budget for fee / gas rejections
    policy: EscalationPolicy,
    /// Delay between result lookups
    poll_interval: Duration,
    /// Overall wait for the execution result
    confirm_timeout: Duration,
    /// Held for a whole submission so sequences are never shared
    in_flight: Mutex<()>,
}

impl<C: ChainClient> TransactionSender<C> {
    pub fn new(
        client: Arc<C>,
        builder: TxBuilder,
        policy: EscalationPolicy,
        poll_interval: Duration,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            client,
            builder,
            policy,
            poll_interval,
            confirm_timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub fn from_config(client: Arc<C>, builder: TxBuilder, config: &TxConfig) -> Self {
        Self::new(
            client,
            builder,
            EscalationPolicy::from_config(config),
            Duration::from_millis(config.confirm_poll_interval_ms),
            Duration::from_secs(config.confirm_timeout_secs),
        )
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Build, submit and confirm `request`, escalating fee or gas limit on
    /// recoverable rejections until `max_attempts` is reached.
    pub async fn send_with_retry(&self, mut request: TxRequest) -> CompounderResult<TxOutcome> {
        let _guard = self.in_flight.lock().await;
        let operation = request.operation;
        let mut attempt: u32 = 1;

        loop {
            let result = match self.builder.build(self.client.as_ref(), &request).await {
                Ok(signed) => self.submit_and_confirm(operation, &signed).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            let rejection = match err.rejection() {
                Some(rejection) => rejection,
                None => {
                    error!(
                        operation,
                        fee = request.fee,
                        gas_limit = request.gas_limit,
                        attempt,
                        reason = "unknown",
                        error = %err,
                        "Transaction failed"
                    );
                    metrics::record_tx_failed(operation, failure_label(&err));
                    return Err(err);
                }
            };

            if !self.policy.can_retry(attempt) {
                error!(
                    operation,
                    fee = request.fee,
                    gas_limit = request.gas_limit,
                    attempt,
                    reason = rejection.reason(),
                    error = %err,
                    "Transaction failed"
                );
                metrics::record_tx_failed(operation, rejection.label());
                return Err(err);
            }

            attempt += 1;
            match rejection {
                Rejection::InsufficientFee => {
                    let prev_fee = request.fee;
                    request.fee = self.policy.escalate_fee(prev_fee);
                    warn!(
                        operation,
                        fee = prev_fee,
                        new_fee = request.fee,
                        gas_limit = request.gas_limit,
                        attempt,
                        "Retrying due to insufficient fee"
                    );
                }
                Rejection::OutOfGas => {
                    let prev_gas_limit = request.gas_limit;
                    request.gas_limit = self.policy.escalate_gas(prev_gas_limit);
                    warn!(
                        operation,
                        fee = request.fee,
                        gas_limit = prev_gas_limit,
                        new_gas_limit = request.gas_limit,
                        attempt,
                        "Retrying due to out of gas"
                    );
                }
            }
            metrics::record_escalation(operation, rejection.resource());
        }
    }

    /// Broadcast in sync mode, then poll for the execution result.
    ///
    /// A broadcast rejection returns immediately without polling. A non-zero
    /// execution code is returned as an error carrying height and hash.
    pub async fn submit_and_confirm(
        &self,
        operation: &str,
        signed: &SignedTx,
    ) -> CompounderResult<TxOutcome> {
        let accepted = self.client.broadcast_tx(signed.bytes.clone()).await?;
        if !accepted.is_success() {
            return Err(rejected(TxStage::Broadcast, accepted));
        }

        info!(
            operation,
            hash = %accepted.tx_hash,
            account_number = signed.account_number,
            sequence = signed.sequence,
            "Transaction sent. Waiting for response"
        );
        metrics::record_tx_submitted(operation);

        let started = Instant::now();
        let result = self.wait_for_result(&accepted.tx_hash).await?;
        if !result.is_success() {
            return Err(rejected(TxStage::Execution, result));
        }

        metrics::record_tx_confirmed(operation, started.elapsed().as_secs_f64());
        info!(
            operation,
            hash = %result.tx_hash,
            height = result.height,
            gas_used = result.gas_used,
            gas_wanted = result.gas_wanted,
            "Transaction executed"
        );

        Ok(TxOutcome {
            height: result.height,
            tx_hash: result.tx_hash,
            gas_used: result.gas_used,
            attempts: 1,
        })
    }

    /// Poll by hash at a fixed rate until a result shows up or the confirm
    /// timeout elapses. Lookup failures only mean "not yet".
    async fn wait_for_result(&self, tx_hash: &str) -> CompounderResult<ChainTxResponse> {
        let poll = async {
            // First lookup one period after acceptance; slow lookups drop ticks
            let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut polls: u32 = 0;
            loop {
                ticker.tick().await;
                polls += 1;
                match self.client.get_tx(tx_hash).await {
                    Ok(Some(result)) => {
                        debug!("Transaction {} found after {} polls", tx_hash, polls);
                        return result;
                    }
                    Ok(None) => debug!("Transaction {} not found yet (poll #{})", tx_hash, polls),
                    Err(e) => debug!("Lookup of {} failed (poll #{}): {}", tx_hash, polls, e),
                }
            }
        };

        timeout(self.confirm_timeout, poll)
            .await
            .map_err(|_| CompounderError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
                waited_secs: self.confirm_timeout.as_secs(),
            })
    }
}

fn rejected(stage: TxStage, response: ChainTxResponse) -> CompounderError {
    CompounderError::Rejected {
        stage,
        code: response.code,
        codespace: response.codespace,
        raw_log: response.raw_log,
        tx_hash: response.tx_hash,
        height: response.height,
    }
}

fn failure_label(err: &CompounderError) -> &'static str {
    match err {
        CompounderError::ConfirmationTimeout { .. } => "confirmation_timeout",
        CompounderError::Rejected { .. } => "rejected",
        CompounderError::Transport(_) => "transport",
        CompounderError::AccountQuery { .. } | CompounderError::InvalidChainResponse(_) => {
            "account_query"
        }
        CompounderError::TxBuild(_) => "build",
        _ => "other",
    }
}
