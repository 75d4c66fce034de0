//! manydeploy-core - deterministic CREATE2 deployments over many chains.
//!
//! A batch of [`DeploymentIntent`]s is resolved into dependency order with
//! every address computed up front, pre-flighted on each target chain, then
//! dispatched through a [`TaskQueue`] that keeps one transaction in flight per
//! sender and chain.

pub mod address;
pub use address::{
    AddressComputer, CREATEX_ADDRESS, ComputedDeploymentParams, Create2Deployer,
    DETERMINISTIC_PROXY_ADDRESS, create2_address, parse_salt,
};

mod artifact;
pub use artifact::{BytecodeObject, ForgeArtifact};

pub mod chains;
pub use chains::{ChainConfig, ChainRegistry, KnownChain, Network, SUPERSIM_FUNDED_ACCOUNT};

pub mod config;
pub use config::{BatchConfig, ContractConfig, RetrySettings, SETTINGS_FILE_NAME, Settings};

mod error;
pub use error::{DeployError, RpcError};

mod intent;
pub use intent::{ConstructorArg, DeploymentIntent, DerivedField};

mod orchestrator;
pub use orchestrator::{ChainQueueKey, Orchestrator};

mod preflight;
pub use preflight::{PreflightOutcome, preflight};

pub mod queue;
pub use queue::{TaskError, TaskHandle, TaskQueue};

mod report;
pub use report::{BatchReport, DeploymentStatus, DeploymentSummary, PairOutcome};

pub mod resolver;
pub use resolver::{DependencyGraph, Resolution, ResolvedDeployment, ResolvedDeploymentParams, resolve};

pub mod rpc;
pub use rpc::{
    CallOutcome, CallRequest, ChainRpc, FeeEstimate, HttpChainRpc, JsonRpcClient, RetryConfig,
    TransactionReceipt,
};

pub mod sender;
pub use sender::{
    CustomRpcSender, ExecutionStrategy, ExternalSigner, ExternalTaskEntry, ExternalTaskStore,
    PrivateKeySender, SenderIdentity, TransactionTask, TxSender, WalletEndpoint,
};

#[cfg(test)]
pub(crate) mod test_utils;
