//! Deterministic (CREATE2) address computation.
//!
//! Addresses are computed off-chain with the same math the deployer contract
//! uses on-chain:
//!
//! ```text
//! address = keccak256(0xff ++ deployer ++ guardedSalt ++ keccak256(initCode))[12..]
//! ```
//!
//! Two deployers are supported. [`Create2Deployer::CreateX`] applies the CreateX
//! salt guard before hashing, [`Create2Deployer::DeterministicProxy`] uses the
//! raw salt.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, address, keccak256},
};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Address of the CreateX factory, identical on every chain it is deployed to.
pub const CREATEX_ADDRESS: Address = address!("0xba5Ed099633D3B313e4D5F7bdc1305d3c28ba5Ed");

/// Address of the deterministic deployment proxy (Arachnid's CREATE2 factory).
pub const DETERMINISTIC_PROXY_ADDRESS: Address =
    address!("0x4e59b44847b379578588920cA78FbF26c0B4956C");

/// Selector of CreateX `deployCreate2(bytes32,bytes)`.
const DEPLOY_CREATE2_SIGNATURE: &str = "deployCreate2(bytes32,bytes)";

/// Byte 20 of a CreateX salt selects the cross-chain redeploy protection.
const REDEPLOY_FLAG_INDEX: usize = 20;

/// The contract that executes CREATE2 on our behalf.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Create2Deployer {
    /// CreateX with the salt guard applied.
    #[default]
    CreateX,
    /// The deterministic deployment proxy; no salt guard.
    DeterministicProxy,
}

impl Create2Deployer {
    /// On-chain address of the deployer.
    pub const fn address(&self) -> Address {
        match self {
            Self::CreateX => CREATEX_ADDRESS,
            Self::DeterministicProxy => DETERMINISTIC_PROXY_ADDRESS,
        }
    }

    /// Calldata that deploys `init_code` with `raw_salt` through this deployer.
    pub fn deploy_calldata(&self, raw_salt: B256, init_code: &Bytes) -> Bytes {
        match self {
            Self::CreateX => {
                let selector = &keccak256(DEPLOY_CREATE2_SIGNATURE.as_bytes())[..4];
                let params = DynSolValue::Tuple(vec![
                    DynSolValue::FixedBytes(raw_salt, 32),
                    DynSolValue::Bytes(init_code.to_vec()),
                ])
                .abi_encode_params();

                let mut calldata = Vec::with_capacity(4 + params.len());
                calldata.extend_from_slice(selector);
                calldata.extend_from_slice(&params);
                calldata.into()
            }
            Self::DeterministicProxy => {
                let mut calldata = Vec::with_capacity(32 + init_code.len());
                calldata.extend_from_slice(raw_salt.as_slice());
                calldata.extend_from_slice(init_code);
                calldata.into()
            }
        }
    }

    /// Decode the address returned by a (simulated) deploy call.
    pub fn decode_deployed_address(&self, output: &[u8]) -> Result<Address, DeployError> {
        match self {
            // ABI-encoded `address`: one left-padded 32 byte word.
            Self::CreateX if output.len() >= 32 => {
                Ok(Address::from_word(B256::from_slice(&output[..32])))
            }
            // The proxy returns the 20 raw address bytes.
            Self::DeterministicProxy if output.len() == 20 => Ok(Address::from_slice(output)),
            _ => Err(DeployError::invalid_input(format!(
                "Unexpected {} return data: 0x{}",
                self,
                hex::encode(output)
            ))),
        }
    }
}

/// Derived parameters of a deployment, a pure function of its init code and salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedDeploymentParams {
    /// Address the deployer will create the contract at.
    pub deterministic_address: Address,
    /// Bytecode with ABI-encoded constructor arguments appended.
    pub init_code: Bytes,
    /// Salt as sent to the deployer.
    pub raw_salt: B256,
    /// Salt after the guard, as it enters the CREATE2 preimage.
    pub guarded_salt: B256,
}

/// Computes deterministic addresses for a given deployer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressComputer {
    deployer: Create2Deployer,
    /// The account that will call CreateX, if it is known up front.
    ///
    /// Only needed for salts that start with the sender's address.
    sender: Option<Address>,
}

impl AddressComputer {
    /// Create a computer for the given deployer.
    pub const fn new(deployer: Create2Deployer) -> Self {
        Self {
            deployer,
            sender: None,
        }
    }

    /// Set the account that submits the deployment.
    pub const fn with_sender(mut self, sender: Option<Address>) -> Self {
        self.sender = sender;
        self
    }

    /// The account that submits the deployment, if known.
    pub const fn sender(&self) -> Option<Address> {
        self.sender
    }

    /// The deployer this computer targets.
    pub const fn deployer(&self) -> Create2Deployer {
        self.deployer
    }

    /// Compute the deterministic address of `init_code` deployed with `raw_salt`.
    pub fn compute_address(&self, init_code: &[u8], raw_salt: B256) -> Result<Address, DeployError> {
        let guarded_salt = self.guarded_salt(raw_salt)?;
        Ok(create2_address(
            self.deployer.address(),
            guarded_salt,
            keccak256(init_code),
        ))
    }

    /// Compute every derived parameter of a deployment.
    pub fn compute(&self, init_code: Bytes, raw_salt: B256) -> Result<ComputedDeploymentParams, DeployError> {
        let guarded_salt = self.guarded_salt(raw_salt)?;
        let deterministic_address =
            create2_address(self.deployer.address(), guarded_salt, keccak256(&init_code));

        Ok(ComputedDeploymentParams {
            deterministic_address,
            init_code,
            raw_salt,
            guarded_salt,
        })
    }

    /// Apply the deployer's salt guard.
    pub fn guarded_salt(&self, raw_salt: B256) -> Result<B256, DeployError> {
        match self.deployer {
            Create2Deployer::CreateX => createx_guard(raw_salt, self.sender),
            Create2Deployer::DeterministicProxy => Ok(raw_salt),
        }
    }
}

/// `keccak256(0xff ++ deployer ++ salt ++ init_code_hash)[12..]`.
pub fn create2_address(deployer: Address, salt: B256, init_code_hash: B256) -> Address {
    let mut preimage = [0u8; 85];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(deployer.as_slice());
    preimage[21..53].copy_from_slice(salt.as_slice());
    preimage[53..85].copy_from_slice(init_code_hash.as_slice());

    Address::from_slice(&keccak256(preimage)[12..])
}

/// Mirror of CreateX's `_guard`.
///
/// Salts that enable cross-chain redeploy protection are rejected: they make
/// the address depend on the chain id, so one batch address could not hold on
/// every target chain.
fn createx_guard(salt: B256, sender: Option<Address>) -> Result<B256, DeployError> {
    let prefix = Address::from_slice(&salt[..20]);
    let flag = salt[REDEPLOY_FLAG_INDEX];

    let sender_scoped = sender.is_some_and(|sender| sender == prefix);

    match (sender_scoped, prefix.is_zero(), flag) {
        (true, _, 0x00) => {
            let mut preimage = [0u8; 64];
            preimage[..32].copy_from_slice(prefix.into_word().as_slice());
            preimage[32..].copy_from_slice(salt.as_slice());
            Ok(keccak256(preimage))
        }
        (true, _, 0x01) | (false, true, 0x01) => Err(DeployError::invalid_input(format!(
            "Salt {salt} enables cross-chain redeploy protection, which makes the address chain-dependent"
        ))),
        (true, _, _) | (false, true, 0x02..) => Err(DeployError::invalid_input(format!(
            "Salt {salt} has an invalid redeploy protection flag 0x{flag:02x}"
        ))),
        _ => Ok(keccak256(salt)),
    }
}

/// Turn a user-provided salt into the raw 32 bytes sent to the deployer.
///
/// `0x` followed by 64 hex digits is taken as-is. Anything else is UTF-8
/// encoded and right-padded with zeros to 32 bytes.
pub fn parse_salt(salt: &str) -> Result<B256, DeployError> {
    let as_bytes32 = salt
        .strip_prefix("0x")
        .filter(|digits| digits.len() == 64)
        .and_then(|digits| hex::decode(digits).ok());
    if let Some(bytes) = as_bytes32 {
        return Ok(B256::from_slice(&bytes));
    }

    let bytes = salt.as_bytes();
    if bytes.len() > 32 {
        return Err(DeployError::invalid_input(format!(
            "Salt '{}' is {} bytes long, at most 32 bytes are allowed",
            salt,
            bytes.len()
        )));
    }

    let mut raw = [0u8; 32];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(raw))
}
