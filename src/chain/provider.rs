//! gRPC implementation of the chain RPC boundary

use super::{AccountState, Balances, ChainClient, ChainTxResponse};
use crate::error::{CompounderError, CompounderResult};

use async_trait::async_trait;
use cosmrs::proto::cosmos::auth::v1beta1::{
    query_client::QueryClient as AuthQueryClient, BaseAccount, QueryAccountRequest,
};
use cosmrs::proto::cosmos::bank::v1beta1::{
    query_client::QueryClient as BankQueryClient, QueryAllBalancesRequest,
};
use cosmrs::proto::cosmos::base::abci::v1beta1::TxResponse;
use cosmrs::proto::cosmos::base::query::v1beta1::PageRequest;
use cosmrs::proto::cosmos::tx::v1beta1::{
    service_client::ServiceClient, BroadcastMode, BroadcastTxRequest, GetTxRequest,
};
use prost::Message;
use tonic::transport::Channel;
use tonic::Code;
use tracing::debug;

const BASE_ACCOUNT_TYPE_URL: &str = "/cosmos.auth.v1beta1.BaseAccount";

/// Account types that embed a `BaseAccount` as their first field
const WRAPPED_ACCOUNT_TYPE_URLS: &[&str] = &[
    "/cosmos.auth.v1beta1.ModuleAccount",
    "/eth.types.v1.EthAccount",
];

/// Shared first field of the wrapped account types
#[derive(Clone, PartialEq, Message)]
struct WrappedAccount {
    #[prost(message, optional, tag = "1")]
    base_account: Option<BaseAccount>,
}

/// Chain node reached over one shared gRPC channel
#[derive(Clone)]
pub struct ChainProvider {
    channel: Channel,
}

impl ChainProvider {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    async fn account_state(&self, address: &str) -> CompounderResult<AccountState> {
        let query_error = |message: String| CompounderError::AccountQuery {
            address: address.to_string(),
            message,
        };

        let response = AuthQueryClient::new(self.channel.clone())
            .account(QueryAccountRequest {
                address: address.to_string(),
            })
            .await
            .map_err(|status| query_error(status.message().to_string()))?
            .into_inner();

        let any = response
            .account
            .ok_or_else(|| query_error("no account in response".to_string()))?;

        let base_account = decode_base_account(&any.type_url, &any.value)?;
        let state = AccountState {
            account_number: base_account.account_number,
            sequence: base_account.sequence,
        };
        debug!(
            "Account {} number={} sequence={}",
            address, state.account_number, state.sequence
        );
        Ok(state)
    }

    async fn balances(&self, address: &str) -> CompounderResult<Balances> {
        let mut client = BankQueryClient::new(self.channel.clone());
        let mut balances = Balances::new();
        let mut pagination: Option<PageRequest> = None;

        loop {
            let response = client
                .all_balances(QueryAllBalancesRequest {
                    address: address.to_string(),
                    pagination: pagination.take(),
                    ..Default::default()
                })
                .await
                .map_err(|status| CompounderError::AccountQuery {
                    address: address.to_string(),
                    message: status.message().to_string(),
                })?
                .into_inner();

            for coin in response.balances {
                let amount: u128 = coin.amount.parse().map_err(|e| {
                    CompounderError::InvalidChainResponse(format!(
                        "balance {}{} is not an integer: {}",
                        coin.amount, coin.denom, e
                    ))
                })?;
                *balances.entry(coin.denom).or_default() += amount;
            }

            match response.pagination {
                Some(page) if !page.next_key.is_empty() => {
                    pagination = Some(PageRequest {
                        key: page.next_key,
                        ..Default::default()
                    });
                }
                _ => break,
            }
        }

        Ok(balances)
    }

    async fn broadcast_tx(&self, tx_bytes: Vec<u8>) -> CompounderResult<ChainTxResponse> {
        let response = ServiceClient::new(self.channel.clone())
            .broadcast_tx(BroadcastTxRequest {
                tx_bytes,
                mode: BroadcastMode::Sync as i32,
            })
            .await
            .map_err(|status| CompounderError::Transport(status.message().to_string()))?
            .into_inner();

        response
            .tx_response
            .map(ChainTxResponse::from)
            .ok_or_else(|| {
                CompounderError::InvalidChainResponse("broadcast returned no tx_response".into())
            })
    }

    async fn get_tx(&self, hash: &str) -> CompounderResult<Option<ChainTxResponse>> {
        let result = ServiceClient::new(self.channel.clone())
            .get_tx(GetTxRequest {
                hash: hash.to_string(),
            })
            .await;

        match result {
            Ok(response) => Ok(response.into_inner().tx_response.map(ChainTxResponse::from)),
            Err(status) if status.code() == Code::NotFound => Ok(None),
            // Nodes report an unindexed tx as a generic error on some versions
            Err(status) if status.message().contains("not found") => Ok(None),
            Err(status) => Err(CompounderError::Transport(status.message().to_string())),
        }
    }
}

fn decode_base_account(type_url: &str, value: &[u8]) -> CompounderResult<BaseAccount> {
    if type_url == BASE_ACCOUNT_TYPE_URL {
        return BaseAccount::decode(value).map_err(|e| {
            CompounderError::InvalidChainResponse(format!("Unable to parse account: {}", e))
        });
    }

    if !WRAPPED_ACCOUNT_TYPE_URLS.contains(&type_url) {
        return Err(CompounderError::InvalidChainResponse(format!(
            "unsupported account type {}",
            type_url
        )));
    }

    WrappedAccount::decode(value)
        .map_err(|e| {
            CompounderError::InvalidChainResponse(format!(
                "Unable to parse account of type {}: {}",
                type_url, e
            ))
        })?
        .base_account
        .ok_or_else(|| {
            CompounderError::InvalidChainResponse(format!(
                "no base account found in {}",
                type_url
            ))
        })
}

impl From<TxResponse> for ChainTxResponse {
    fn from(res: TxResponse) -> Self {
        Self {
            height: res.height,
            tx_hash: res.txhash,
            code: res.code,
            codespace: res.codespace,
            raw_log: res.raw_log,
            gas_wanted: res.gas_wanted,
            gas_used: res.gas_used,
        }
    }
}
