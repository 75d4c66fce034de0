//! Transaction senders.
//!
//! A sender turns a [`TransactionTask`] into a mined transaction hash. Each
//! submodule implements one execution strategy:
//! - `private_key` - signs locally and broadcasts raw transactions
//! - `custom_rpc` - hands the transaction to a wallet endpoint (e.g. a sponsored relay)
//! - `external` - parks the transaction until someone else signs it

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::{
    error::DeployError,
    rpc::{ChainRpc, TransactionReceipt},
};

pub mod custom_rpc;
pub mod external;
pub mod private_key;

pub use custom_rpc::{CustomRpcSender, WalletEndpoint, sponsored_sender_url};
pub use external::{ExternalSigner, ExternalTaskEntry, ExternalTaskStore};
pub use private_key::PrivateKeySender;

/// One transaction to send on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTask {
    /// Deployment the transaction belongs to, for logs.
    pub deployment_id: String,
    pub chain_id: u64,
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
}

/// Who submits transactions. Part of the per-chain queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum SenderIdentity {
    #[display("private-key:{_0}")]
    PrivateKey(Address),
    #[display("custom-rpc:{_0}")]
    CustomRpc(String),
    #[display("external-signer")]
    ExternalSigner,
}

/// Submits transactions for a batch.
pub trait TxSender: Send + Sync + 'static {
    fn identity(&self) -> SenderIdentity;

    /// Submit `task` and return its hash once the strategy considers it done.
    fn send_tx(&self, task: TransactionTask) -> impl Future<Output = Result<B256, DeployError>> + Send;
}

/// The execution strategy chosen for a batch.
#[derive(Debug)]
pub enum ExecutionStrategy<R> {
    PrivateKey(PrivateKeySender<R>),
    CustomRpc(CustomRpcSender<R>),
    External(ExternalSigner<R>),
}

impl<R: ChainRpc> TxSender for ExecutionStrategy<R> {
    fn identity(&self) -> SenderIdentity {
        match self {
            Self::PrivateKey(sender) => sender.identity(),
            Self::CustomRpc(sender) => sender.identity(),
            Self::External(sender) => sender.identity(),
        }
    }

    async fn send_tx(&self, task: TransactionTask) -> Result<B256, DeployError> {
        match self {
            Self::PrivateKey(sender) => sender.send_tx(task).await,
            Self::CustomRpc(sender) => sender.send_tx(task).await,
            Self::External(sender) => sender.send_tx(task).await,
        }
    }
}

/// Wait for `hash` and fail if it reverted.
pub(crate) async fn confirm<R: ChainRpc>(rpc: &R, chain_id: u64, hash: B256) -> Result<TransactionReceipt, DeployError> {
    let receipt = rpc
        .wait_for_receipt(chain_id, hash)
        .await
        .map_err(|e| DeployError::rpc(chain_id, e))?;

    if !receipt.succeeded() {
        return Err(DeployError::Submission {
            chain_id,
            reason: format!("Transaction {hash} reverted"),
        });
    }

    tracing::debug!(chain_id, %hash, block = ?receipt.block_number, "Transaction confirmed");
    Ok(receipt)
}
