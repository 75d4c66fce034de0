//! Batch documents and tool settings.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    artifact::ForgeArtifact,
    chains::{ChainConfig, ChainRegistry, Network},
    intent::{ConstructorArg, DeploymentIntent},
    rpc::{DEFAULT_POLL_INTERVAL, DEFAULT_RECEIPT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, RetryConfig},
};

/// Default settings file, looked up in the working directory.
pub const SETTINGS_FILE_NAME: &str = "Manydeploy.toml";

/// Prefix of the environment variables that override settings.
pub const SETTINGS_ENV_PREFIX: &str = "MANYDEPLOY_";

/// One `[[contracts]]` entry of a batch document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Defaults to `forge_artifact_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub salt: String,
    #[serde(default)]
    pub constructor_args: Vec<Value>,
    pub forge_artifact_path: PathBuf,
}

impl ContractConfig {
    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.forge_artifact_path.display().to_string())
    }
}

/// A batch document: which contracts to deploy on which chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Chain names or ids. Entries may be comma-separated lists.
    pub chains: Vec<String>,
    #[serde(default)]
    pub network: Network,
    pub contracts: Vec<ContractConfig>,

    /// Directory relative artifact paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl BatchConfig {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize batch config to TOML")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write batch config to {}", path.display()))?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse batch config {} as TOML", path.display()))?;

        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        tracing::debug!(
            path = %path.display(),
            network = %config.network,
            contracts = config.contracts.len(),
            "Loaded batch config"
        );
        Ok(config)
    }

    fn artifact_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Resolve the `chains` list against `registry`.
    pub fn chains(&self, registry: &ChainRegistry) -> Result<Vec<ChainConfig>> {
        Ok(registry.resolve_all(self.network, &self.chains)?)
    }

    /// Load the artifacts and build one intent per contract, in document order.
    ///
    /// Artifacts shared by several contracts are read once.
    pub fn intents(&self) -> Result<Vec<DeploymentIntent>> {
        let mut artifacts: HashMap<PathBuf, Arc<ForgeArtifact>> = HashMap::new();
        let mut intents = Vec::with_capacity(self.contracts.len());

        for contract in &self.contracts {
            let id = contract.id();
            let path = self.artifact_path(&contract.forge_artifact_path);

            let artifact = match artifacts.get(&path) {
                Some(artifact) => artifact.clone(),
                None => {
                    let artifact = Arc::new(
                        ForgeArtifact::load_from_file(&path)
                            .with_context(|| format!("Failed to load artifact for contract {id}"))?,
                    );
                    artifacts.insert(path, artifact.clone());
                    artifact
                }
            };

            let constructor_args = contract
                .constructor_args
                .iter()
                .cloned()
                .map(ConstructorArg::parse)
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Invalid constructor arguments for contract {id}"))?;

            intents.push(DeploymentIntent {
                id,
                salt: contract.salt.clone(),
                constructor_args,
                artifact,
            });
        }

        Ok(intents)
    }
}

/// Retry policy as written in a settings file. Durations are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_delay_ms: retry.initial_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Tool settings, layered from [`SETTINGS_FILE_NAME`] and `MANYDEPLOY_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// RPC URL overrides keyed by chain id.
    pub rpc_urls: BTreeMap<String, Url>,
    pub retry: RetrySettings,
    pub request_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Wait for receipts even when a wallet endpoint queues its own nonces.
    pub wallet_receipt_wait: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_urls: BTreeMap::new(),
            retry: RetrySettings::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            wallet_receipt_wait: false,
        }
    }
}

impl Settings {
    /// Defaults, then the settings file (if it exists), then the environment.
    ///
    /// Nested keys use `__` in variable names, e.g. `MANYDEPLOY_RETRY__MAX_ATTEMPTS`.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(SETTINGS_FILE_NAME));
        let settings: Self = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        tracing::debug!(path = %path.display(), overrides = settings.rpc_urls.len(), "Loaded settings");
        Ok(settings)
    }

    /// RPC URL overrides with parsed chain ids.
    pub fn rpc_overrides(&self) -> Result<Vec<(u64, Url)>> {
        self.rpc_urls
            .iter()
            .map(|(chain_id, url)| {
                let chain_id = chain_id
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid chain id '{chain_id}' in rpc_urls"))?;
                Ok((chain_id, url.clone()))
            })
            .collect()
    }

    pub fn registry(&self) -> Result<ChainRegistry> {
        Ok(ChainRegistry::new().with_rpc_overrides(self.rpc_overrides()?))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        artifact::tests::{greeter_artifact, vault_artifact},
        intent::DerivedField,
    };

    const BATCH: &str = r#"
chains = ["op, base", "unichain"]
network = "sepolia"

[[contracts]]
id = "Greeter"
salt = "s1"
constructor_args = ["hello", 42]
forge_artifact_path = "out/Greeter.json"

[[contracts]]
salt = "s1"
constructor_args = ["{{Greeter.address}}"]
forge_artifact_path = "out/Vault.json"
"#;

    fn write_batch(dir: &Path) -> PathBuf {
        let out = dir.join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(
            out.join("Greeter.json"),
            serde_json::to_string(&greeter_artifact()).unwrap(),
        )
        .unwrap();
        std::fs::write(out.join("Vault.json"), serde_json::to_string(&vault_artifact()).unwrap()).unwrap();

        let path = dir.join("batch.toml");
        std::fs::write(&path, BATCH).unwrap();
        path
    }

    #[test]
    fn test_load_batch_and_build_intents() {
        let dir = tempdir::TempDir::new("manydeploy-batch").unwrap();
        let config = BatchConfig::load_from_file(&write_batch(dir.path())).unwrap();

        assert_eq!(config.network, Network::Sepolia);
        assert_eq!(config.base_dir, dir.path());

        let intents = config.intents().unwrap();
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].id, "Greeter");
        assert_eq!(
            intents[0].constructor_args,
            vec![
                ConstructorArg::Value { value: json!("hello") },
                ConstructorArg::Value { value: json!(42) },
            ]
        );
        assert_eq!(intents[1].id, "out/Vault.json");
        assert_eq!(
            intents[1].constructor_args,
            vec![ConstructorArg::Reference {
                id: "Greeter".to_string(),
                field: DerivedField::Address,
            }]
        );
    }

    #[test]
    fn test_batch_chains() {
        let dir = tempdir::TempDir::new("manydeploy-batch").unwrap();
        let config = BatchConfig::load_from_file(&write_batch(dir.path())).unwrap();

        let chains = config.chains(&ChainRegistry::new()).unwrap();
        let ids: Vec<u64> = chains.iter().map(|c| c.chain_id).collect();
        assert_eq!(ids, vec![11155420, 84532, 1301]);
    }

    #[test]
    fn test_missing_artifact_names_contract() {
        let dir = tempdir::TempDir::new("manydeploy-batch").unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, BATCH).unwrap();

        let err = BatchConfig::load_from_file(&path).unwrap().intents().unwrap_err();
        assert!(format!("{err:#}").contains("Greeter"));
    }

    #[test]
    fn test_invalid_reference_field() {
        let dir = tempdir::TempDir::new("manydeploy-batch").unwrap();
        let path = write_batch(dir.path());
        let mut config = BatchConfig::load_from_file(&path).unwrap();
        config.contracts[1].constructor_args = vec![json!("{{Greeter.bytecode}}")];

        assert!(config.intents().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir::TempDir::new("manydeploy-batch").unwrap();
        let path = write_batch(dir.path());
        let config = BatchConfig::load_from_file(&path).unwrap();

        let copy = dir.path().join("copy.toml");
        config.save_to_file(&copy).unwrap();
        assert_eq!(BatchConfig::load_from_file(&copy).unwrap(), config);
    }

    #[test]
    fn test_settings_rejects_bad_chain_id() {
        let mut settings = Settings::default();
        settings
            .rpc_urls
            .insert("op".to_string(), "http://localhost:9545".parse().unwrap());
        assert!(settings.registry().is_err());
    }

    #[test]
    fn test_settings_defaults_without_file() {
        let dir = tempdir::TempDir::new("manydeploy-settings").unwrap();
        let settings = Settings::load(Some(&dir.path().join("missing.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(RetryConfig::from(settings.retry), RetryConfig::default());
    }

    #[test]
    fn test_settings_file() {
        let dir = tempdir::TempDir::new("manydeploy-settings").unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"
receipt_timeout_secs = 30

[rpc_urls]
10 = "http://localhost:9545/"

[retry]
max_attempts = 2
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.receipt_timeout(), Duration::from_secs(30));
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.max_delay_ms, RetrySettings::default().max_delay_ms);
        assert_eq!(settings.rpc_overrides().unwrap().len(), 1);

        let op = settings.registry().unwrap().resolve(Network::Mainnet, "op").unwrap();
        assert_eq!(op.rpc_url.as_str(), "http://localhost:9545/");
    }
}
