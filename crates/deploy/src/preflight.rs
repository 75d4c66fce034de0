//! Pre-flight checks run before anything is sent.

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    address::{ComputedDeploymentParams, Create2Deployer},
    chains::simulation_sender,
    error::{DeployError, RpcError},
    rpc::{CallOutcome, CallRequest, ChainRpc},
};

/// What pre-flight found for one (deployment, chain) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PreflightOutcome {
    /// Code already exists at the expected address.
    AlreadyDeployed,
    /// The deployer would create the contract somewhere else.
    AddressMismatch { expected: Address, actual: Address },
    /// Safe to send.
    Ready,
}

/// Check one pair: existing bytecode first, then a simulated deploy.
///
/// The simulation is sent from `sender` when it is known, since CreateX guards
/// sender-scoped salts by caller. Otherwise a funded account for the chain is
/// used. A simulation that reverts does not block the deployment.
pub async fn preflight<R: ChainRpc>(
    rpc: &R,
    deployer: Create2Deployer,
    sender: Option<Address>,
    chain_id: u64,
    computed: &ComputedDeploymentParams,
) -> Result<PreflightOutcome, DeployError> {
    let expected = computed.deterministic_address;

    let code = rpc
        .get_code(chain_id, expected)
        .await
        .map_err(|e| DeployError::rpc(chain_id, e))?;
    if !code.is_empty() {
        tracing::debug!(chain_id, address = %expected, "Contract already deployed");
        return Ok(PreflightOutcome::AlreadyDeployed);
    }

    let request = CallRequest::new(
        deployer.address(),
        deployer.deploy_calldata(computed.raw_salt, &computed.init_code),
    )
    .with_from(sender.unwrap_or_else(|| simulation_sender(chain_id)));

    let output = match rpc
        .call(chain_id, &request)
        .await
        .map_err(|e| DeployError::rpc(chain_id, e))?
    {
        CallOutcome::Success(output) => output,
        CallOutcome::Reverted { message, .. } => {
            tracing::debug!(chain_id, address = %expected, %message, "Deployment simulation reverted, proceeding");
            return Ok(PreflightOutcome::Ready);
        }
    };

    if output.is_empty() {
        return Err(DeployError::rpc(
            chain_id,
            RpcError::InvalidResponse(format!(
                "Deployer {} returned no data, is it deployed on chain {chain_id}?",
                deployer.address()
            )),
        ));
    }

    let actual = deployer.decode_deployed_address(&output)?;
    if actual != expected {
        tracing::warn!(chain_id, %expected, %actual, "Simulated address does not match");
        return Ok(PreflightOutcome::AddressMismatch { expected, actual });
    }

    Ok(PreflightOutcome::Ready)
}
