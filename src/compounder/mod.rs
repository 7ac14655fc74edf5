//! Reward claiming and restaking against the compounder contract

mod msg;
mod stake;

pub use msg::ExecuteMsg;
pub use stake::{parse_stake_assignments, read_stake_assignments, StakeAssignment};

use crate::chain::ChainClient;
use crate::config::Settings;
use crate::error::{CompounderError, CompounderResult};
use crate::keys::SigningIdentity;
use crate::metrics;
use crate::tx::{execute_contract_msg, TransactionSender, TxOutcome, TxRequest};

use cosmrs::AccountId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Drives the two contract operations for one signer
pub struct Compounder<C> {
    sender: TransactionSender<C>,
    signer: Arc<SigningIdentity>,
    contract: AccountId,
    denom: String,
    /// Left in the wallet to pay fees
    fee_reserve: u128,
    stake_source: PathBuf,
    gas_limit: u64,
    fee_initial: u128,
}

impl<C: ChainClient> Compounder<C> {
    pub fn new(
        settings: &Settings,
        sender: TransactionSender<C>,
        signer: Arc<SigningIdentity>,
    ) -> CompounderResult<Self> {
        let compounder = Self {
            sender,
            signer,
            contract: settings.contract_address()?,
            denom: settings.chain.denom.clone(),
            fee_reserve: u128::from(settings.compounder.fee_reserve),
            stake_source: settings.compounder.stake_source_path.clone(),
            gas_limit: settings.tx.gas_limit,
            fee_initial: u128::from(settings.tx.fee_initial),
        };

        info!(
            "Compounder initialized with address {} for contract {}",
            compounder.signer.address(),
            compounder.contract
        );
        Ok(compounder)
    }

    /// Withdraw accumulated rewards from the contract
    pub async fn claim_rewards(&self) -> CompounderResult<TxOutcome> {
        let outcome = self
            .sender
            .send_with_retry(self.request(&ExecuteMsg::ClaimRewards {})?)
            .await?;
        info!(
            hash = %outcome.tx_hash,
            height = outcome.height,
            gas_used = outcome.gas_used,
            attempts = outcome.attempts,
            "Redeem successful"
        );
        Ok(outcome)
    }

    /// Restake across the validators listed in the stake source.
    ///
    /// Aborts without a transaction when the balance does not cover the fee
    /// reserve or the source holds no usable rows.
    pub async fn compound(&self) -> CompounderResult<TxOutcome> {
        let stake_amount = self.stake_amount().await?;

        let stake_msgs = read_stake_assignments(&self.stake_source)?;
        if stake_msgs.is_empty() {
            return Err(CompounderError::NoStakeAssignments {
                path: self.stake_source.display().to_string(),
            });
        }

        info!(
            stake_amount,
            validators = stake_msgs.len(),
            "Compounding {}",
            self.denom
        );

        let outcome = self
            .sender
            .send_with_retry(self.request(&ExecuteMsg::Stake { stake_msgs })?)
            .await?;
        info!(
            hash = %outcome.tx_hash,
            height = outcome.height,
            gas_used = outcome.gas_used,
            attempts = outcome.attempts,
            "Compound successful"
        );
        Ok(outcome)
    }

    /// Spendable balance of the fee denom after the fee reserve
    pub async fn stake_amount(&self) -> CompounderResult<u128> {
        let balances = self
            .sender
            .client()
            .balances(&self.signer.address())
            .await?;
        let balance = balances.get(&self.denom).copied().unwrap_or(0);
        metrics::record_wallet_balance(&self.denom, balance);

        balance.checked_sub(self.fee_reserve).ok_or_else(|| {
            error!(balance, reserve = self.fee_reserve, "Insufficient balance to stake");
            CompounderError::InsufficientBalance {
                denom: self.denom.clone(),
                have: balance,
                need: self.fee_reserve,
            }
        })
    }

    fn request(&self, msg: &ExecuteMsg) -> CompounderResult<TxRequest> {
        Ok(TxRequest {
            operation: msg.operation(),
            messages: vec![execute_contract_msg(
                self.signer.account_id(),
                &self.contract,
                msg,
            )?],
            signer: self.signer.clone(),
            gas_limit: self.gas_limit,
            fee: self.fee_initial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AccountState, Balances, ChainTxResponse, MockChainClient};
    use crate::keys::{Keyring, TEST_MNEMONIC};
    use crate::tx::TxBuilder;
    use cosmrs::cosmwasm::MsgExecuteContract;
    use cosmrs::tx::Msg;
    use cosmrs::Tx;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::Mutex as StdMutex;
    use tempfile::NamedTempFile;

    fn settings(stake_source: &std::path::Path) -> Settings {
        let text = format!(
            r#"
[chain]
grpc_endpoint = "localhost:9090"
insecure = true
chain_id = "nibiru-localnet-0"

[signer]
mnemonic = "{TEST_MNEMONIC}"

[tx]
gas_limit = 2000000
fee_initial = 50000
max_attempts = 3
multiplier = 1.5

[compounder]
contract_address = "nibi1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5g8g800"
stake_source_path = "{}"
"#,
            stake_source.display()
        );
        Settings::from_toml(&text).unwrap()
    }

    fn stake_file(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "validator,weight").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn compounder(client: MockChainClient, stake_source: &std::path::Path) -> Compounder<MockChainClient> {
        let settings = settings(stake_source);
        let signer = Keyring::new("nibi")
            .get_or_create("compounder", Some(TEST_MNEMONIC))
            .unwrap();
        let builder = TxBuilder::new(&settings.chain.chain_id, &settings.chain.denom).unwrap();
        let sender = TransactionSender::from_config(Arc::new(client), builder, &settings.tx);
        Compounder::new(&settings, sender, signer).unwrap()
    }

    fn balance(amount: u128) -> Balances {
        let mut balances = Balances::new();
        balances.insert("unibi".to_string(), amount);
        balances.insert("uusdc".to_string(), 42);
        balances
    }

    /// Expect one successful submission and capture the contract message body
    fn expect_success(client: &mut MockChainClient) -> Arc<StdMutex<Option<MsgExecuteContract>>> {
        let captured = Arc::new(StdMutex::new(None));
        let sink = captured.clone();
        client.expect_account_state().times(1).returning(|_| {
            Ok(AccountState {
                account_number: 5,
                sequence: 1,
            })
        });
        client.expect_broadcast_tx().times(1).returning(move |bytes| {
            let tx = Tx::from_bytes(&bytes).unwrap();
            let msg = MsgExecuteContract::from_any(&tx.body.messages[0]).unwrap();
            *sink.lock().unwrap() = Some(msg);
            Ok(ChainTxResponse {
                tx_hash: "HASH".to_string(),
                ..Default::default()
            })
        });
        client.expect_get_tx().times(1).returning(|_| {
            Ok(Some(ChainTxResponse {
                tx_hash: "HASH".to_string(),
                height: 321,
                ..Default::default()
            }))
        });
        captured
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_rewards_message() {
        let mut client = MockChainClient::new();
        let captured = expect_success(&mut client);
        let file = stake_file(&[]);

        let outcome = compounder(client, file.path()).claim_rewards().await.unwrap();
        assert_eq!(outcome.height, 321);

        let msg = captured.lock().unwrap().take().unwrap();
        let body: Value = serde_json::from_slice(&msg.msg).unwrap();
        assert_eq!(body, json!({ "claim_rewards": {} }));
        assert!(msg.funds.is_empty());
        assert_eq!(msg.contract.as_ref(), "nibi1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5g8g800");
        assert_eq!(msg.sender.as_ref(), "nibi19rl4cm2hmr8afy4kldpxz3fka4jguq0at9fykx");
    }

    #[tokio::test(start_paused = true)]
    async fn test_compound_stakes_file_rows() {
        let mut client = MockChainClient::new();
        client
            .expect_balances()
            .times(1)
            .returning(|_| Ok(balance(6_000_000)));
        let captured = expect_success(&mut client);
        let file = stake_file(&["val1,10", "val2,abc", "val3,5"]);

        let outcome = compounder(client, file.path()).compound().await.unwrap();
        assert_eq!(outcome.tx_hash, "HASH");

        let msg = captured.lock().unwrap().take().unwrap();
        let body: Value = serde_json::from_slice(&msg.msg).unwrap();
        assert_eq!(
            body,
            json!({
                "stake": {
                    "stake_msgs": [
                        { "share": 10, "validator": "val1" },
                        { "share": 5, "validator": "val3" }
                    ]
                }
            })
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance_sends_nothing() {
        let mut client = MockChainClient::new();
        client
            .expect_balances()
            .times(1)
            .returning(|_| Ok(balance(999_999)));
        client.expect_account_state().times(0);
        client.expect_broadcast_tx().times(0);
        let file = stake_file(&["val1,10"]);

        let err = compounder(client, file.path()).compound().await.unwrap_err();
        assert!(matches!(
            err,
            CompounderError::InsufficientBalance { have: 999_999, need: 1_000_000, .. }
        ));
    }

    #[tokio::test]
    async fn test_stake_amount_subtracts_reserve() {
        let mut client = MockChainClient::new();
        let mut calls = 0;
        client.expect_balances().times(2).returning(move |_| {
            calls += 1;
            Ok(balance(if calls == 1 { 1_000_000 } else { 3_500_000 }))
        });
        let file = stake_file(&[]);
        let compounder = compounder(client, file.path());

        assert_eq!(compounder.stake_amount().await.unwrap(), 0);
        assert_eq!(compounder.stake_amount().await.unwrap(), 2_500_000);
    }

    #[tokio::test]
    async fn test_missing_denom_counts_as_zero() {
        let mut client = MockChainClient::new();
        client.expect_balances().returning(|_| Ok(Balances::new()));
        let file = stake_file(&[]);

        let err = compounder(client, file.path()).stake_amount().await.unwrap_err();
        assert!(matches!(err, CompounderError::InsufficientBalance { have: 0, .. }));
    }

    #[tokio::test]
    async fn test_empty_stake_source_sends_nothing() {
        let mut client = MockChainClient::new();
        client
            .expect_balances()
            .returning(|_| Ok(balance(2_000_000)));
        client.expect_broadcast_tx().times(0);
        let file = stake_file(&["val1,not-a-number"]);

        let err = compounder(client, file.path()).compound().await.unwrap_err();
        assert!(matches!(err, CompounderError::NoStakeAssignments { .. }));
    }
}
