//! Batch orchestration.
//!
//! A batch goes through three phases:
//! 1. Resolve: order the intents and compute every address. Errors here abort
//!    the batch before anything touches a chain.
//! 2. Pre-flight: for every (deployment, chain) pair, concurrently, skip pairs
//!    that are already deployed and flag pairs whose simulated address differs.
//! 3. Dispatch: enqueue the remaining pairs on the [`TaskQueue`], keyed by
//!    (sender, chain), in resolution order, and wait for all of them.

use std::sync::Arc;

use alloy_core::primitives::{B256, U256};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    address::AddressComputer,
    chains::ChainConfig,
    error::DeployError,
    intent::DeploymentIntent,
    preflight::{PreflightOutcome, preflight},
    queue::{TaskError, TaskHandle, TaskQueue, wait},
    report::{BatchReport, DeploymentStatus, DeploymentSummary, PairOutcome},
    resolver::{Resolution, ResolvedDeployment, resolve},
    rpc::ChainRpc,
    sender::{SenderIdentity, TransactionTask, TxSender},
};

/// Queue key: at most one transaction in flight per sender and chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "camelCase")]
#[display("{sender}@{chain_id}")]
pub struct ChainQueueKey {
    pub sender: SenderIdentity,
    pub chain_id: u64,
}

type DispatchQueue = TaskQueue<ChainQueueKey, TransactionTask, B256, DeployError>;

/// Plans and dispatches batches of deployments over many chains.
pub struct Orchestrator<R, S> {
    rpc: Arc<R>,
    sender: Arc<S>,
    computer: AddressComputer,
    queue: DispatchQueue,
}

impl<R: ChainRpc, S: TxSender> Orchestrator<R, S> {
    pub fn new(rpc: Arc<R>, sender: Arc<S>, computer: AddressComputer) -> Self {
        let processor_sender = sender.clone();
        let queue = TaskQueue::new(move |task: TransactionTask| {
            let sender = processor_sender.clone();
            async move { sender.send_tx(task).await }
        });

        Self {
            rpc,
            sender,
            computer,
            queue,
        }
    }

    pub fn computer(&self) -> &AddressComputer {
        &self.computer
    }

    /// Stop dispatching. Transactions already in flight finish, queued ones
    /// are reported as [`DeploymentStatus::Cancelled`].
    pub fn cancel(&self) {
        tracing::warn!("Cancelling batch");
        self.queue.cancel();
    }

    /// Resolve and pre-flight a batch without sending anything.
    ///
    /// Pairs that would be sent are reported as [`DeploymentStatus::Pending`].
    pub async fn plan_batch(
        &self,
        intents: &[DeploymentIntent],
        chains: &[ChainConfig],
    ) -> Result<BatchReport, DeployError> {
        let resolution = resolve(intents, &self.computer)?;
        let checked = self.preflight_all(&resolution, chains).await;

        let outcomes = checked
            .into_iter()
            .map(|(pair, result)| {
                let status = match result {
                    Ok(PreflightOutcome::Ready) => DeploymentStatus::Pending,
                    other => preflight_status(other),
                };
                pair.into_outcome(status)
            })
            .collect();

        Ok(self.report(&resolution, outcomes, None))
    }

    /// Resolve, pre-flight and dispatch a batch.
    ///
    /// Only batch-level problems (invalid input, cycles, unresolved
    /// references) are returned as errors. Everything else ends up in the
    /// report, one outcome per (deployment, chain) pair.
    pub async fn deploy_batch(
        &self,
        intents: &[DeploymentIntent],
        chains: &[ChainConfig],
    ) -> Result<BatchReport, DeployError> {
        let resolution = resolve(intents, &self.computer)?;
        let identity = self.sender.identity();

        tracing::info!(
            deployments = resolution.deployments.len(),
            chains = chains.len(),
            sender = %identity,
            deployer = %self.computer.deployer(),
            "Deploying batch"
        );

        let checked = self.preflight_all(&resolution, chains).await;

        let mut statuses: Vec<Option<DeploymentStatus>> = Vec::with_capacity(checked.len());
        let mut pairs = Vec::with_capacity(checked.len());
        for (pair, result) in checked {
            statuses.push(match result {
                Ok(PreflightOutcome::Ready) => None,
                other => Some(preflight_status(other)),
            });
            pairs.push(pair);
        }

        // Pairs come out of pre-flight in resolution order, so dependencies are
        // queued ahead of their dependents on every chain.
        let mut handles: Vec<(usize, TaskHandle<B256, DeployError>)> = Vec::new();
        for (index, pair) in pairs.iter().enumerate() {
            if statuses[index].is_some() {
                continue;
            }

            let key = ChainQueueKey {
                sender: identity.clone(),
                chain_id: pair.chain.chain_id,
            };
            let task = TransactionTask {
                deployment_id: pair.deployment.params.id.clone(),
                chain_id: pair.chain.chain_id,
                to: self.computer.deployer().address(),
                data: self
                    .computer
                    .deployer()
                    .deploy_calldata(pair.deployment.computed.raw_salt, &pair.deployment.computed.init_code),
                value: U256::ZERO,
            };

            tracing::debug!(%key, id = %task.deployment_id, "Queueing deployment");
            match self.queue.submit(key, task).await {
                Ok(handle) => handles.push((index, handle)),
                Err(e) => statuses[index] = Some(task_status(Err(e))),
            }
        }

        let results = join_all(handles.into_iter().map(|(index, handle)| async move {
            (index, wait(handle).await)
        }))
        .await;
        for (index, result) in results {
            statuses[index] = Some(task_status(result));
        }

        let outcomes: Vec<PairOutcome> = pairs
            .into_iter()
            .zip(statuses)
            .map(|(pair, status)| {
                let status = status.unwrap_or(DeploymentStatus::Cancelled);
                log_outcome(&pair, &status);
                pair.into_outcome(status)
            })
            .collect();

        Ok(self.report(&resolution, outcomes, Some(identity.to_string())))
    }

    /// Pre-flight every pair concurrently, returning results in resolution order.
    async fn preflight_all<'a>(
        &self,
        resolution: &'a Resolution,
        chains: &'a [ChainConfig],
    ) -> Vec<(Pair<'a>, Result<PreflightOutcome, DeployError>)> {
        let deployer = self.computer.deployer();
        let sender = self.computer.sender();
        let pairs = resolution
            .in_order()
            .flat_map(|deployment| chains.iter().map(move |chain| Pair { deployment, chain }));

        join_all(pairs.map(|pair| async move {
            let result = preflight(
                self.rpc.as_ref(),
                deployer,
                sender,
                pair.chain.chain_id,
                &pair.deployment.computed,
            )
            .await;
            (pair, result)
        }))
        .await
    }

    fn report(&self, resolution: &Resolution, outcomes: Vec<PairOutcome>, sender: Option<String>) -> BatchReport {
        BatchReport {
            deployer: self.computer.deployer(),
            sender,
            order: resolution.order.clone(),
            deployments: resolution.deployments.iter().map(DeploymentSummary::from).collect(),
            outcomes,
        }
    }
}

/// A deployment on one chain.
#[derive(Debug, Clone, Copy)]
struct Pair<'a> {
    deployment: &'a ResolvedDeployment,
    chain: &'a ChainConfig,
}

impl Pair<'_> {
    fn into_outcome(self, status: DeploymentStatus) -> PairOutcome {
        PairOutcome {
            id: self.deployment.params.id.clone(),
            chain_id: self.chain.chain_id,
            chain: self.chain.identifier.clone(),
            address: self.deployment.computed.deterministic_address,
            status,
        }
    }
}

fn preflight_status(result: Result<PreflightOutcome, DeployError>) -> DeploymentStatus {
    match result {
        Ok(PreflightOutcome::AlreadyDeployed) => DeploymentStatus::AlreadyDeployed,
        Ok(PreflightOutcome::AddressMismatch { expected, actual }) => {
            DeploymentStatus::AddressMismatch { expected, actual }
        }
        Ok(PreflightOutcome::Ready) => DeploymentStatus::Pending,
        Err(e) => DeploymentStatus::Failed { reason: e.to_string() },
    }
}

fn task_status(result: Result<B256, TaskError<DeployError>>) -> DeploymentStatus {
    match result {
        Ok(hash) => DeploymentStatus::Deployed { hash },
        Err(TaskError::Failed(DeployError::Cancelled)) | Err(TaskError::Cancelled) => DeploymentStatus::Cancelled,
        Err(TaskError::Failed(e)) => DeploymentStatus::Failed { reason: e.to_string() },
        Err(TaskError::Dropped) => DeploymentStatus::Failed {
            reason: "Transaction task dropped".to_string(),
        },
    }
}

fn log_outcome(pair: &Pair<'_>, status: &DeploymentStatus) {
    let id = &pair.deployment.params.id;
    let chain = &pair.chain.identifier;
    let address = pair.deployment.computed.deterministic_address;
    match status {
        DeploymentStatus::Deployed { hash } => {
            tracing::info!(%id, %chain, %address, %hash, "Contract deployed");
        }
        DeploymentStatus::AlreadyDeployed => {
            tracing::info!(%id, %chain, %address, "Contract already deployed");
        }
        DeploymentStatus::Failed { reason } => {
            tracing::error!(%id, %chain, %address, %reason, "Deployment failed");
        }
        other => {
            tracing::warn!(%id, %chain, %address, status = other.name(), "Deployment not completed");
        }
    }
}
