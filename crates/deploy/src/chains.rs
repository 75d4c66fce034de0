//! Known networks and their chains.

use std::collections::HashMap;

use alloy_core::primitives::{Address, address};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DeployError;

/// Prefunded dev account of supersim and anvil.
pub const SUPERSIM_FUNDED_ACCOUNT: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// A chain known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownChain {
    /// Short name within the network, e.g. `op`.
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_url: &'static str,
}

const fn chain(name: &'static str, chain_id: u64, rpc_url: &'static str) -> KnownChain {
    KnownChain {
        name,
        chain_id,
        rpc_url,
    }
}

const MAINNET_CHAINS: &[KnownChain] = &[
    chain("op", 10, "https://mainnet.optimism.io"),
    chain("base", 8453, "https://mainnet.base.org"),
    chain("ink", 57073, "https://rpc-gel.inkonchain.com"),
    chain("unichain", 130, "https://mainnet.unichain.org"),
    chain("mode", 34443, "https://mainnet.mode.network"),
    chain("zora", 7777777, "https://rpc.zora.energy"),
    chain("soneium", 1868, "https://rpc.soneium.org"),
    chain("lisk", 1135, "https://rpc.api.lisk.com"),
];

const SEPOLIA_CHAINS: &[KnownChain] = &[
    chain("op", 11155420, "https://sepolia.optimism.io"),
    chain("base", 84532, "https://sepolia.base.org"),
    chain("ink", 763373, "https://rpc-gel-sepolia.inkonchain.com"),
    chain("unichain", 1301, "https://sepolia.unichain.org"),
    chain("mode", 919, "https://sepolia.mode.network"),
    chain("zora", 999999999, "https://sepolia.rpc.zora.energy"),
];

const SUPERSIM_CHAINS: &[KnownChain] = &[
    chain("supersiml2a", 901, "http://127.0.0.1:9545"),
    chain("supersiml2b", 902, "http://127.0.0.1:9546"),
    chain("supersiml2c", 903, "http://127.0.0.1:9547"),
    chain("supersiml2d", 904, "http://127.0.0.1:9548"),
    chain("supersiml2e", 905, "http://127.0.0.1:9549"),
];

const INTEROP_ALPHA_CHAINS: &[KnownChain] = &[
    chain("interop-alpha-0", 420120000, "https://interop-alpha-0.optimism.io"),
    chain("interop-alpha-1", 420120001, "https://interop-alpha-1.optimism.io"),
];

/// A group of rollup chains deployed to together.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    Mainnet,
    #[default]
    Sepolia,
    Supersim,
    InteropAlpha,
}

impl Network {
    /// Rollup chains of the network.
    pub const fn chains(&self) -> &'static [KnownChain] {
        match self {
            Network::Mainnet => MAINNET_CHAINS,
            Network::Sepolia => SEPOLIA_CHAINS,
            Network::Supersim => SUPERSIM_CHAINS,
            Network::InteropAlpha => INTEROP_ALPHA_CHAINS,
        }
    }

    /// Look up a rollup chain by short name or chain id.
    pub fn chain(&self, name_or_id: &str) -> Option<KnownChain> {
        let by_id = name_or_id.parse::<u64>().ok();
        self.chains()
            .iter()
            .find(|c| c.name == name_or_id || Some(c.chain_id) == by_id)
            .copied()
    }
}

/// A chain selected for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// `<network>/<name>`, or the bare chain id for chains outside the registry.
    pub identifier: String,
    pub rpc_url: Url,
}

/// Resolves chain selectors against the known networks and RPC overrides.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    rpc_overrides: HashMap<u64, Url>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `url` instead of the default endpoint for `chain_id`.
    pub fn with_rpc_override(mut self, chain_id: u64, url: Url) -> Self {
        self.rpc_overrides.insert(chain_id, url);
        self
    }

    pub fn with_rpc_overrides(mut self, overrides: impl IntoIterator<Item = (u64, Url)>) -> Self {
        self.rpc_overrides.extend(overrides);
        self
    }

    /// Resolve one selector.
    ///
    /// Accepted forms: a short name within `network` (`op`), a full identifier
    /// (`sepolia/op`), or a chain id. A chain id outside the registry is only
    /// accepted when it has an RPC override.
    pub fn resolve(&self, network: Network, selector: &str) -> Result<ChainConfig, DeployError> {
        let selector = selector.trim();

        let (network, name) = match selector.split_once('/') {
            Some((prefix, name)) => {
                let network = prefix.parse::<Network>().map_err(|_| {
                    DeployError::invalid_input(format!("Unknown network '{prefix}' in chain '{selector}'"))
                })?;
                (network, name)
            }
            None => (network, selector),
        };

        if let Some(known) = network.chain(name) {
            let rpc_url = match self.rpc_overrides.get(&known.chain_id) {
                Some(url) => url.clone(),
                None => known.rpc_url.parse().map_err(|e| {
                    DeployError::invalid_input(format!("Invalid RPC URL for {}: {e}", known.name))
                })?,
            };
            return Ok(ChainConfig {
                chain_id: known.chain_id,
                identifier: format!("{network}/{}", known.name),
                rpc_url,
            });
        }

        let custom = name
            .parse::<u64>()
            .ok()
            .and_then(|chain_id| self.rpc_overrides.get(&chain_id).map(|url| (chain_id, url)));
        match custom {
            Some((chain_id, url)) => Ok(ChainConfig {
                chain_id,
                identifier: chain_id.to_string(),
                rpc_url: url.clone(),
            }),
            None => Err(DeployError::invalid_input(format!(
                "Unknown chain '{selector}' for network {network}"
            ))),
        }
    }

    /// Resolve a list of selectors. Entries may be comma-separated lists.
    /// Duplicates are dropped, keeping the first occurrence.
    pub fn resolve_all<S: AsRef<str>>(&self, network: Network, selectors: &[S]) -> Result<Vec<ChainConfig>, DeployError> {
        let mut chains: Vec<ChainConfig> = Vec::new();
        for selector in selectors.iter().flat_map(|s| s.as_ref().split(',')) {
            if selector.trim().is_empty() {
                continue;
            }
            let chain = self.resolve(network, selector)?;
            if !chains.iter().any(|c| c.chain_id == chain.chain_id) {
                chains.push(chain);
            }
        }

        if chains.is_empty() {
            return Err(DeployError::invalid_input("No chains selected"));
        }
        Ok(chains)
    }
}

/// Account used as `from` when simulating deployments on `chain_id`.
///
/// Local supersim chains get the prefunded dev account, everything else the
/// zero address.
pub fn simulation_sender(chain_id: u64) -> Address {
    if (900..=905).contains(&chain_id) {
        SUPERSIM_FUNDED_ACCOUNT
    } else {
        Address::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_short_name() {
        let registry = ChainRegistry::new();
        let op = registry.resolve(Network::Sepolia, "op").unwrap();
        assert_eq!(op.chain_id, 11155420);
        assert_eq!(op.identifier, "sepolia/op");
        assert_eq!(op.rpc_url.as_str(), "https://sepolia.optimism.io/");

        let op = registry.resolve(Network::Mainnet, "op").unwrap();
        assert_eq!(op.chain_id, 10);
    }

    #[test]
    fn test_resolve_full_identifier_overrides_network() {
        let registry = ChainRegistry::new();
        let chain = registry.resolve(Network::Mainnet, "supersim/supersiml2b").unwrap();
        assert_eq!(chain.chain_id, 902);
        assert_eq!(chain.identifier, "supersim/supersiml2b");

        let chain = registry
            .resolve(Network::Sepolia, "interop-alpha/interop-alpha-1")
            .unwrap();
        assert_eq!(chain.chain_id, 420120001);
    }

    #[test]
    fn test_resolve_by_chain_id() {
        let registry = ChainRegistry::new();
        assert_eq!(registry.resolve(Network::Sepolia, "84532").unwrap().identifier, "sepolia/base");
        assert!(registry.resolve(Network::Sepolia, "12345").is_err());

        let registry = registry.with_rpc_override(12345, "http://localhost:8545".parse().unwrap());
        let custom = registry.resolve(Network::Sepolia, "12345").unwrap();
        assert_eq!(custom.identifier, "12345");
        assert_eq!(custom.rpc_url.as_str(), "http://localhost:8545/");
    }

    #[test]
    fn test_rpc_override_applies_to_known_chain() {
        let registry = ChainRegistry::new().with_rpc_override(10, "http://op.local:9545".parse().unwrap());
        let op = registry.resolve(Network::Mainnet, "op").unwrap();
        assert_eq!(op.rpc_url.as_str(), "http://op.local:9545/");
    }

    #[test]
    fn test_resolve_all_splits_and_dedups() {
        let registry = ChainRegistry::new();
        let chains = registry
            .resolve_all(Network::Sepolia, &["op, base", "sepolia/op", "unichain"])
            .unwrap();
        let ids: Vec<u64> = chains.iter().map(|c| c.chain_id).collect();
        assert_eq!(ids, vec![11155420, 84532, 1301]);
    }

    #[test]
    fn test_resolve_errors() {
        let registry = ChainRegistry::new();
        assert!(registry.resolve(Network::Sepolia, "nope").is_err());
        assert!(registry.resolve(Network::Sepolia, "devnet/op").is_err());
        assert!(registry.resolve_all::<&str>(Network::Sepolia, &[]).is_err());
        assert!(registry.resolve_all(Network::Sepolia, &[" , "]).is_err());
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("interop-alpha".parse::<Network>().unwrap(), Network::InteropAlpha);
        assert_eq!(Network::InteropAlpha.to_string(), "interop-alpha");
    }

    #[test]
    fn test_simulation_sender() {
        assert_eq!(simulation_sender(901), SUPERSIM_FUNDED_ACCOUNT);
        assert_eq!(simulation_sender(900), SUPERSIM_FUNDED_ACCOUNT);
        assert_eq!(simulation_sender(10), Address::ZERO);
    }
}
