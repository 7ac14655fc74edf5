//! Transaction assembly and signing

use crate::chain::ChainClient;
use crate::error::{CompounderError, CompounderResult};
use crate::keys::SigningIdentity;

use cosmrs::cosmwasm::MsgExecuteContract;
use cosmrs::tendermint::chain;
use cosmrs::tx::{Body, Fee, Msg, SignDoc, SignerInfo};
use cosmrs::{AccountId, Any, Coin, Denom};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One logical submission. Only the escalation controller mutates
/// `gas_limit` and `fee` between attempts.
#[derive(Debug, Clone)]
pub struct TxRequest {
    /// Short label for logs and metrics
    pub operation: &'static str,
    pub messages: Vec<Any>,
    pub signer: Arc<SigningIdentity>,
    pub gas_limit: u64,
    /// Fee amount in the smallest unit of the fee denom
    pub fee: u128,
}

/// Wire-encoded signed transaction plus the account numbers it was signed with
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub bytes: Vec<u8>,
    pub account_number: u64,
    pub sequence: u64,
}

/// Builds and signs transactions for one chain
pub struct TxBuilder {
    chain_id: chain::Id,
    fee_denom: Denom,
}

impl TxBuilder {
    pub fn new(chain_id: &str, fee_denom: &str) -> CompounderResult<Self> {
        let chain_id = chain_id
            .parse()
            .map_err(|e| CompounderError::Config(format!("Invalid chain id {:?}: {}", chain_id, e)))?;
        let fee_denom = fee_denom
            .parse()
            .map_err(|e| CompounderError::Config(format!("Invalid denom {:?}: {}", fee_denom, e)))?;
        Ok(Self {
            chain_id,
            fee_denom,
        })
    }

    /// Assemble, sign and encode `request`.
    ///
    /// The signer's account state is queried on every call so a retry never
    /// reuses a sequence the chain already consumed.
    pub async fn build<C>(&self, client: &C, request: &TxRequest) -> CompounderResult<SignedTx>
    where
        C: ChainClient + ?Sized,
    {
        let body = Body::new(request.messages.clone(), "", 0u32);

        let mut fee = Fee::from_amount_and_gas(
            Coin {
                denom: self.fee_denom.clone(),
                amount: request.fee,
            },
            request.gas_limit,
        );
        fee.payer = Some(request.signer.account_id().clone());

        let account = client.account_state(&request.signer.address()).await?;

        let auth_info = SignerInfo::single_direct(Some(request.signer.public_key()), account.sequence)
            .auth_info(fee);

        let sign_doc = SignDoc::new(&body, &auth_info, &self.chain_id, account.account_number)
            .map_err(|e| CompounderError::TxBuild(format!("sign doc: {}", e)))?;
        let raw = sign_doc
            .sign(request.signer.signing_key())
            .map_err(|e| CompounderError::TxBuild(format!("signing: {}", e)))?;
        let bytes = raw
            .to_bytes()
            .map_err(|e| CompounderError::TxBuild(format!("encoding: {}", e)))?;

        debug!(
            operation = request.operation,
            sequence = account.sequence,
            account_number = account.account_number,
            size = bytes.len(),
            "Signed transaction"
        );

        Ok(SignedTx {
            bytes,
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }
}

/// CosmWasm execute message carrying `msg` as its JSON body, without funds
pub fn execute_contract_msg<T: Serialize>(
    sender: &AccountId,
    contract: &AccountId,
    msg: &T,
) -> CompounderResult<Any> {
    let body = serde_json::to_vec(msg)
        .map_err(|e| CompounderError::TxBuild(format!("contract message: {}", e)))?;

    MsgExecuteContract {
        sender: sender.clone(),
        contract: contract.clone(),
        msg: body,
        funds: vec![],
    }
    .to_any()
    .map_err(|e| CompounderError::TxBuild(format!("contract message: {}", e)))
}
