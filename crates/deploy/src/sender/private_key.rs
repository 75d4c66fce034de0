//! Local private-key signing.

use std::{str::FromStr, sync::Arc};

use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_core::primitives::{Address, B256, TxKind};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use super::{SenderIdentity, TransactionTask, TxSender, confirm};
use crate::{
    error::DeployError,
    rpc::{CallRequest, ChainRpc},
};

/// Extra gas on top of the node's estimate, in percent.
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;

/// Node estimate plus the buffer, saturating at `u64::MAX`.
const fn buffered_gas_limit(gas: u64) -> u64 {
    gas.saturating_add(gas.saturating_mul(GAS_LIMIT_BUFFER_PERCENT) / 100)
}

/// Signs EIP-1559 transactions with a local key.
///
/// Waits for the receipt before returning so the next transaction for the same
/// chain sees the updated nonce and never replaces this one.
#[derive(Debug)]
pub struct PrivateKeySender<R> {
    signer: PrivateKeySigner,
    rpc: Arc<R>,
}

impl<R: ChainRpc> PrivateKeySender<R> {
    pub fn new(signer: PrivateKeySigner, rpc: Arc<R>) -> Self {
        Self { signer, rpc }
    }

    /// Parse a hex private key, with or without `0x`.
    pub fn from_private_key(private_key: &str, rpc: Arc<R>) -> Result<Self, DeployError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| DeployError::invalid_input(format!("Invalid private key: {e}")))?;
        Ok(Self::new(signer, rpc))
    }

    /// Account the transactions are sent from.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    async fn build_and_sign(&self, task: &TransactionTask) -> Result<(B256, Vec<u8>), DeployError> {
        let chain_id = task.chain_id;
        let from = self.signer.address();
        let request = CallRequest::new(task.to, task.data.clone()).with_from(from);

        let (nonce, fees, gas) = tokio::try_join!(
            self.rpc.transaction_count(chain_id, from),
            self.rpc.fee_estimate(chain_id),
            self.rpc.estimate_gas(chain_id, &request),
        )
        .map_err(|e| DeployError::rpc(chain_id, e))?;

        let tx = TxEip1559 {
            chain_id,
            nonce,
            gas_limit: buffered_gas_limit(gas),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            to: TxKind::Call(task.to),
            value: task.value,
            access_list: Default::default(),
            input: task.data.clone(),
        };

        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| DeployError::Submission {
                chain_id,
                reason: format!("Failed to sign transaction: {e}"),
            })?;
        let signed = tx.into_signed(signature);

        tracing::debug!(chain_id, nonce, gas_limit = signed.tx().gas_limit, hash = %signed.hash(), "Transaction signed");
        Ok((*signed.hash(), signed.encoded_2718()))
    }
}

impl<R: ChainRpc> TxSender for PrivateKeySender<R> {
    fn identity(&self) -> SenderIdentity {
        SenderIdentity::PrivateKey(self.signer.address())
    }

    async fn send_tx(&self, task: TransactionTask) -> Result<B256, DeployError> {
        let chain_id = task.chain_id;
        let (hash, raw) = self.build_and_sign(&task).await?;

        match self.rpc.send_raw_transaction(chain_id, raw.into()).await {
            Ok(_) => {}
            // A retried broadcast can hit the node twice.
            Err(e) if e.to_string().contains("already known") => {
                tracing::debug!(chain_id, %hash, "Transaction already known to the node");
            }
            Err(e) if e.is_retryable() => return Err(DeployError::rpc(chain_id, e)),
            Err(e) => {
                return Err(DeployError::Submission {
                    chain_id,
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(chain_id, id = %task.deployment_id, %hash, "Transaction sent");
        confirm(self.rpc.as_ref(), chain_id, hash).await?;
        Ok(hash)
    }
}
