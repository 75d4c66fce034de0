//! Error types for planning and dispatching deployments.

use thiserror::Error;

use crate::intent::DerivedField;

/// Errors surfaced by the chain RPC layer.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Network-level failure (connection refused, reset, DNS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or wait timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    JsonRpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// The node answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No endpoint is configured for the chain.
    #[error("No RPC endpoint configured for chain {0}")]
    UnknownChain(u64),
}

impl RpcError {
    /// Returns true if the error is transient and the request should be retried.
    ///
    /// Only transport-level failures are retried. A JSON-RPC error is an answer
    /// from the node and retrying it would give the same answer.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Returns true if the error is an execution revert reported by the node.
    pub fn is_revert(&self) -> bool {
        match self {
            // Geth and anvil report reverts with code 3, some nodes only say it in the message.
            Self::JsonRpc { code, message, .. } => {
                *code == 3 || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors raised while planning or dispatching a batch.
///
/// `InvalidInput`, `CycleDetected` and `UnresolvedReference` are fatal for the
/// whole batch. The remaining variants describe a single (contract, chain) pair.
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    /// Malformed salt, bytecode, constructor argument or batch document.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The dependency graph of the batch has a cycle.
    #[error("Failed to create deployment plan, cycle detected {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// A reference points at an id missing from the batch, or a field that cannot be derived.
    #[error("Unresolved reference {{{{{id}.{field}}}}}")]
    UnresolvedReference { id: String, field: DerivedField },

    /// RPC failure after retries.
    #[error("RPC failure on chain {chain_id}: {source}")]
    Rpc {
        chain_id: u64,
        #[source]
        source: RpcError,
    },

    /// Signing, broadcast or on-chain execution of a transaction failed.
    #[error("Submission failed on chain {chain_id}: {reason}")]
    Submission { chain_id: u64, reason: String },

    /// The batch was cancelled before this item was dispatched.
    #[error("Cancelled")]
    Cancelled,
}

impl DeployError {
    /// Shorthand for [`DeployError::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap an [`RpcError`] with the chain it happened on.
    pub fn rpc(chain_id: u64, source: RpcError) -> Self {
        Self::Rpc { chain_id, source }
    }
}
