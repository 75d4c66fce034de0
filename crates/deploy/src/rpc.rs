//! Chain RPC access.
//!
//! [`ChainRpc`] is the narrow view of a node the planner and senders need.
//! [`HttpChainRpc`] implements it over plain JSON-RPC with one
//! [`JsonRpcClient`] per chain.

use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::error::RpcError;

/// Default timeout for a single RPC request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for a transaction to be included.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Priority fee used when the node does not implement `eth_maxPriorityFeePerGas`.
const FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// Retry policy for transient RPC failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial delay for exponential backoff.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Creates a `backon` [`ExponentialBuilder`] from this configuration.
    pub fn to_backoff_builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts as usize)
    }
}

/// Parameters of `eth_call`, `eth_estimateGas` and `eth_sendTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(rename = "data")]
    pub input: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

impl CallRequest {
    pub fn new(to: Address, input: Bytes) -> Self {
        Self {
            to,
            input,
            ..Default::default()
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// Result of `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call returned normally.
    Success(Bytes),
    /// The call reverted.
    Reverted { message: String, data: Option<String> },
}

/// EIP-1559 fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeEstimate {
    /// Fees for a block with the given base fee: `2 * base + priority`.
    pub fn from_base_fee(base_fee: u128, priority_fee: u128) -> Self {
        Self {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }
}

/// The subset of a transaction receipt we look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U64>,
}

impl TransactionReceipt {
    /// Returns true unless the receipt reports a failed execution.
    pub fn succeeded(&self) -> bool {
        self.status != Some(U64::ZERO)
    }
}

/// Read and write access to the chains of a batch.
pub trait ChainRpc: Send + Sync + 'static {
    /// Deployed code at `address` (`eth_getCode` at latest).
    fn get_code(&self, chain_id: u64, address: Address) -> impl Future<Output = Result<Bytes, RpcError>> + Send;

    /// Simulate a call (`eth_call` at latest). Reverts are reported as [`CallOutcome::Reverted`].
    fn call(&self, chain_id: u64, request: &CallRequest) -> impl Future<Output = Result<CallOutcome, RpcError>> + Send;

    /// Pending nonce of `address`.
    fn transaction_count(&self, chain_id: u64, address: Address) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn estimate_gas(&self, chain_id: u64, request: &CallRequest) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn fee_estimate(&self, chain_id: u64) -> impl Future<Output = Result<FeeEstimate, RpcError>> + Send;

    /// Broadcast a signed transaction and return its hash.
    fn send_raw_transaction(&self, chain_id: u64, raw: Bytes) -> impl Future<Output = Result<B256, RpcError>> + Send;

    /// Wait until `hash` is included and return its receipt.
    fn wait_for_receipt(
        &self,
        chain_id: u64,
        hash: B256,
    ) -> impl Future<Output = Result<TransactionReceipt, RpcError>> + Send;
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn parse_response<T: DeserializeOwned>(method: &str, response: JsonRpcResponse) -> Result<T, RpcError> {
    if let Some(error) = response.error {
        return Err(RpcError::JsonRpc {
            code: error.code,
            message: error.message,
            data: error.data.map(|d| match d {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        });
    }

    serde_json::from_value(response.result)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to deserialize {method} result: {e}")))
}

/// A JSON-RPC client for a single endpoint, retrying transport failures.
#[derive(Debug)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(client: reqwest::Client, url: Url, retry: RetryConfig) -> Self {
        Self {
            client,
            url,
            retry,
            next_id: AtomicU64::new(1),
        }
    }

    /// Make a JSON-RPC call and deserialize the result.
    ///
    /// Transport failures are retried with exponential backoff. JSON-RPC error
    /// objects are returned as-is.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let backoff = self.retry.to_backoff_builder();

        (|| async { self.request_once(method, &params).await })
            .retry(backoff)
            .when(|e| e.is_retryable())
            .notify(|err, dur| {
                tracing::debug!(error = %err, delay = ?dur, method, url = %self.url, "Retrying RPC request");
            })
            .await
    }

    async fn request_once<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(method, id, url = %self.url, "Sending RPC request");

        let response: JsonRpcResponse = self
            .client
            .post(self.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(method, response)
    }
}

/// [`ChainRpc`] over HTTP JSON-RPC endpoints, one per chain id.
#[derive(Debug)]
pub struct HttpChainRpc {
    clients: HashMap<u64, JsonRpcClient>,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl HttpChainRpc {
    /// Build clients for every `(chain_id, url)` pair.
    pub fn new(
        endpoints: impl IntoIterator<Item = (u64, Url)>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = create_client(request_timeout)?;
        let clients = endpoints
            .into_iter()
            .map(|(chain_id, url)| (chain_id, JsonRpcClient::new(client.clone(), url, retry.clone())))
            .collect();

        Ok(Self {
            clients,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    pub fn with_receipt_polling(mut self, poll_interval: Duration, receipt_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.receipt_timeout = receipt_timeout;
        self
    }

    pub fn client(&self, chain_id: u64) -> Result<&JsonRpcClient, RpcError> {
        self.clients.get(&chain_id).ok_or(RpcError::UnknownChain(chain_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockFees {
    #[serde(default)]
    base_fee_per_gas: Option<U256>,
}

impl ChainRpc for HttpChainRpc {
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Bytes, RpcError> {
        self.client(chain_id)?
            .request("eth_getCode", json!([address, "latest"]))
            .await
    }

    async fn call(&self, chain_id: u64, request: &CallRequest) -> Result<CallOutcome, RpcError> {
        match self
            .client(chain_id)?
            .request::<Bytes>("eth_call", json!([request, "latest"]))
            .await
        {
            Ok(output) => Ok(CallOutcome::Success(output)),
            Err(e) if e.is_revert() => {
                let RpcError::JsonRpc { message, data, .. } = e else {
                    return Err(e);
                };
                Ok(CallOutcome::Reverted { message, data })
            }
            Err(e) => Err(e),
        }
    }

    async fn transaction_count(&self, chain_id: u64, address: Address) -> Result<u64, RpcError> {
        let nonce: U64 = self
            .client(chain_id)?
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(nonce.to())
    }

    async fn estimate_gas(&self, chain_id: u64, request: &CallRequest) -> Result<u64, RpcError> {
        let gas: U64 = self
            .client(chain_id)?
            .request("eth_estimateGas", json!([request]))
            .await?;
        Ok(gas.to())
    }

    async fn fee_estimate(&self, chain_id: u64) -> Result<FeeEstimate, RpcError> {
        let client = self.client(chain_id)?;
        let block: Option<BlockFees> = client
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        let Some(base_fee) = block.and_then(|b| b.base_fee_per_gas) else {
            // Pre-London chain, fall back to the legacy gas price for both fields.
            let gas_price: U256 = client.request("eth_gasPrice", json!([])).await?;
            let gas_price = gas_price.saturating_to::<u128>();
            return Ok(FeeEstimate {
                max_fee_per_gas: gas_price,
                max_priority_fee_per_gas: gas_price,
            });
        };

        let priority_fee = match client
            .request::<U256>("eth_maxPriorityFeePerGas", json!([]))
            .await
        {
            Ok(fee) => fee.saturating_to::<u128>(),
            Err(RpcError::JsonRpc { code, message, .. }) => {
                tracing::debug!(chain_id, code, %message, "eth_maxPriorityFeePerGas unavailable, using fallback");
                FALLBACK_PRIORITY_FEE
            }
            Err(e) => return Err(e),
        };

        Ok(FeeEstimate::from_base_fee(base_fee.saturating_to::<u128>(), priority_fee))
    }

    async fn send_raw_transaction(&self, chain_id: u64, raw: Bytes) -> Result<B256, RpcError> {
        self.client(chain_id)?
            .request("eth_sendRawTransaction", json!([raw]))
            .await
    }

    async fn wait_for_receipt(&self, chain_id: u64, hash: B256) -> Result<TransactionReceipt, RpcError> {
        let client = self.client(chain_id)?;
        let start = Instant::now();

        loop {
            if start.elapsed() > self.receipt_timeout {
                return Err(RpcError::Timeout(format!(
                    "Transaction {hash} not included on chain {chain_id} after {:?}",
                    self.receipt_timeout
                )));
            }

            match client
                .request::<Option<TransactionReceipt>>("eth_getTransactionReceipt", json!([hash]))
                .await
            {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    tracing::trace!(chain_id, %hash, "Receipt not available yet");
                }
                Err(e) if e.is_retryable() => {
                    tracing::trace!(chain_id, %hash, error = %e, "Receipt poll failed, retrying...");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
