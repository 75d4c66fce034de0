//! Out-of-band signing through a shared task store.

use std::{collections::BTreeMap, sync::Arc};

use alloy_core::primitives::B256;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};

use super::{SenderIdentity, TransactionTask, TxSender, confirm};
use crate::{error::DeployError, rpc::ChainRpc};

/// A task as seen by whoever signs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTaskEntry {
    pub id: u64,
    pub request: TransactionTask,
    /// Set once the task was completed.
    pub hash: Option<B256>,
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    entries: BTreeMap<u64, ExternalTaskEntry>,
    waiters: BTreeMap<u64, oneshot::Sender<B256>>,
    closed: bool,
}

/// Pending transactions waiting for an external signature.
///
/// Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct ExternalTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl ExternalTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its id and a receiver for the hash.
    pub async fn register(&self, request: TransactionTask) -> Result<(u64, oneshot::Receiver<B256>), DeployError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(DeployError::Submission {
                chain_id: request.chain_id,
                reason: "External signer is closed".to_string(),
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        let (tx, rx) = oneshot::channel();

        tracing::info!(
            task_id = id,
            chain_id = request.chain_id,
            to = %request.to,
            data = %request.data,
            "Transaction awaiting external signature"
        );

        state.entries.insert(
            id,
            ExternalTaskEntry {
                id,
                request,
                hash: None,
            },
        );
        state.waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// All tasks, ordered by id.
    pub async fn list(&self) -> Vec<ExternalTaskEntry> {
        self.state.lock().await.entries.values().cloned().collect()
    }

    /// Tasks that still need a signature.
    pub async fn pending(&self) -> Vec<ExternalTaskEntry> {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.hash.is_none())
            .cloned()
            .collect()
    }

    /// Record that task `id` was sent as `hash`.
    pub async fn complete(&self, id: u64, hash: B256) -> Result<(), DeployError> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| DeployError::invalid_input(format!("Unknown transaction task {id}")))?;

        if let Some(existing) = entry.hash {
            return Err(DeployError::invalid_input(format!(
                "Transaction task {id} already completed with {existing}"
            )));
        }
        entry.hash = Some(hash);

        if let Some(waiter) = state.waiters.remove(&id) {
            // The sender may have given up waiting.
            let _ = waiter.send(hash);
        }

        tracing::debug!(task_id = id, %hash, "Transaction task completed");
        Ok(())
    }

    /// Reject new tasks and fail every pending one.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        // Dropping the senders wakes every waiter with an error.
        state.waiters.clear();
    }
}

/// Parks transactions in an [`ExternalTaskStore`] until someone completes them.
#[derive(Debug)]
pub struct ExternalSigner<R> {
    store: ExternalTaskStore,
    rpc: Arc<R>,
}

impl<R: ChainRpc> ExternalSigner<R> {
    pub fn new(store: ExternalTaskStore, rpc: Arc<R>) -> Self {
        Self { store, rpc }
    }
}

impl<R: ChainRpc> TxSender for ExternalSigner<R> {
    fn identity(&self) -> SenderIdentity {
        SenderIdentity::ExternalSigner
    }

    async fn send_tx(&self, task: TransactionTask) -> Result<B256, DeployError> {
        let chain_id = task.chain_id;
        let (task_id, rx) = self.store.register(task).await?;

        let hash = rx.await.map_err(|_| DeployError::Submission {
            chain_id,
            reason: format!("External signer closed before task {task_id} was completed"),
        })?;

        confirm(self.rpc.as_ref(), chain_id, hash).await?;
        Ok(hash)
    }
}
