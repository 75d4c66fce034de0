//! Wallet endpoints that sign on our behalf.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::{Address, B256};
use serde_json::json;
use url::Url;

use super::{SenderIdentity, TransactionTask, TxSender, confirm};
use crate::{
    error::DeployError,
    rpc::{ChainRpc, JsonRpcClient, RetryConfig, create_client},
};

const SPONSORED_SENDER_BASE_URL: &str = "https://dapp-console-api.optimism.io/api/sponsored-sender";

/// Placeholder replaced by the chain id in custom endpoint templates.
const CHAIN_ID_PLACEHOLDER: &str = "{chain_id}";

/// Wallet RPC URL of the sponsored sender for `chain_id`.
pub fn sponsored_sender_url(api_key: &str, chain_id: u64) -> String {
    format!("{SPONSORED_SENDER_BASE_URL}/{api_key}/{chain_id}")
}

/// Where transactions are handed off.
#[derive(Clone, PartialEq, Eq)]
pub enum WalletEndpoint {
    /// The sponsored sender relay.
    Sponsored { api_key: String },
    /// Any `eth_sendTransaction` endpoint. `{chain_id}` in the template is substituted.
    Custom { url_template: String },
}

// Keeps the API key out of logs.
impl std::fmt::Debug for WalletEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sponsored { .. } => f.write_str("Sponsored"),
            Self::Custom { url_template } => f.debug_struct("Custom").field("url_template", url_template).finish(),
        }
    }
}

impl WalletEndpoint {
    pub fn url_for(&self, chain_id: u64) -> Result<Url, DeployError> {
        let raw = match self {
            Self::Sponsored { api_key } => sponsored_sender_url(api_key, chain_id),
            Self::Custom { url_template } => url_template.replace(CHAIN_ID_PLACEHOLDER, &chain_id.to_string()),
        };
        raw.parse()
            .map_err(|e| DeployError::invalid_input(format!("Invalid wallet RPC URL for chain {chain_id}: {e}")))
    }

    /// Label used in the sender identity.
    pub fn label(&self) -> String {
        match self {
            Self::Sponsored { .. } => "sponsored".to_string(),
            Self::Custom { url_template } => url_template.clone(),
        }
    }
}

/// Sends through a wallet endpoint with `eth_sendTransaction`.
///
/// The endpoint picks the account, so `from` is the zero address. Endpoints
/// that manage their own nonces are trusted to queue transactions and the
/// call returns on submission; otherwise it also waits for the receipt.
#[derive(Debug)]
pub struct CustomRpcSender<R> {
    endpoint: WalletEndpoint,
    client: reqwest::Client,
    rpc: Arc<R>,
    wait_for_receipt: bool,
}

impl<R: ChainRpc> CustomRpcSender<R> {
    pub fn new(endpoint: WalletEndpoint, rpc: Arc<R>, request_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint,
            client: create_client(request_timeout)?,
            rpc,
            wait_for_receipt: false,
        })
    }

    /// Also wait for the receipt, for endpoints that do not queue.
    pub fn with_receipt_wait(mut self, wait: bool) -> Self {
        self.wait_for_receipt = wait;
        self
    }
}

impl<R: ChainRpc> TxSender for CustomRpcSender<R> {
    fn identity(&self) -> SenderIdentity {
        SenderIdentity::CustomRpc(self.endpoint.label())
    }

    async fn send_tx(&self, task: TransactionTask) -> Result<B256, DeployError> {
        let chain_id = task.chain_id;
        let url = self.endpoint.url_for(chain_id)?;

        // eth_sendTransaction is not idempotent, never retry it.
        let no_retry = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let client = JsonRpcClient::new(self.client.clone(), url, no_retry);

        let hash: B256 = client
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": Address::ZERO,
                    "to": task.to,
                    "data": task.data,
                    "value": task.value,
                }]),
            )
            .await
            .map_err(|e| match e {
                e if e.is_retryable() => DeployError::rpc(chain_id, e),
                e => DeployError::Submission {
                    chain_id,
                    reason: e.to_string(),
                },
            })?;

        tracing::info!(chain_id, id = %task.deployment_id, %hash, endpoint = %self.endpoint.label(), "Transaction handed to wallet endpoint");

        if self.wait_for_receipt {
            confirm(self.rpc.as_ref(), chain_id, hash).await?;
        }
        Ok(hash)
    }
}
