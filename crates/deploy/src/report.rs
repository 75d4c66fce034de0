//! Batch results.

use std::path::Path;

use alloy_core::primitives::{Address, B256, keccak256};
use anyhow::Context;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{address::Create2Deployer, resolver::ResolvedDeployment};

/// Final state of one (deployment, chain) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeploymentStatus {
    /// Would be sent. Only produced by dry runs.
    Pending,
    AlreadyDeployed,
    Deployed { hash: B256 },
    AddressMismatch { expected: Address, actual: Address },
    Failed { reason: String },
    Cancelled,
}

impl DeploymentStatus {
    /// Returns true if the contract is (or would be) at its expected address.
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Pending | Self::AlreadyDeployed | Self::Deployed { .. })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AlreadyDeployed => "already-deployed",
            Self::Deployed { .. } => "deployed",
            Self::AddressMismatch { .. } => "address-mismatch",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Status of one deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairOutcome {
    pub id: String,
    pub chain_id: u64,
    /// Chain identifier, e.g. `sepolia/op`.
    pub chain: String,
    pub address: Address,
    #[serde(flatten)]
    pub status: DeploymentStatus,
}

/// Chain-independent parameters of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub id: String,
    pub address: Address,
    pub salt: String,
    pub raw_salt: B256,
    pub constructor_args: Vec<Value>,
    pub init_code_hash: B256,
}

impl From<&ResolvedDeployment> for DeploymentSummary {
    fn from(deployment: &ResolvedDeployment) -> Self {
        Self {
            id: deployment.params.id.clone(),
            address: deployment.computed.deterministic_address,
            salt: deployment.params.salt.clone(),
            raw_salt: deployment.computed.raw_salt,
            constructor_args: deployment.params.constructor_args.clone(),
            init_code_hash: keccak256(&deployment.computed.init_code),
        }
    }
}

/// Everything a batch produced, one outcome per (deployment, chain) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub deployer: Create2Deployer,
    /// Identity of the sender, absent for dry runs.
    pub sender: Option<String>,
    /// Ids in resolution order.
    pub order: Vec<String>,
    pub deployments: Vec<DeploymentSummary>,
    pub outcomes: Vec<PairOutcome>,
}

impl BatchReport {
    pub fn outcome(&self, id: &str, chain_id: u64) -> Option<&PairOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.id == id && o.chain_id == chain_id)
    }

    /// Returns true if every pair ended up at its expected address.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_ok())
    }

    /// Number of pairs per status name.
    pub fn status_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for outcome in &self.outcomes {
            let name = outcome.status.name();
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name, 1)),
            }
        }
        counts
    }

    /// Render one row per (deployment, chain) pair.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Contract", "Chain", "Address", "Status", "Details"]);

        for outcome in &self.outcomes {
            let color = match &outcome.status {
                DeploymentStatus::Deployed { .. } | DeploymentStatus::AlreadyDeployed => Color::Green,
                DeploymentStatus::Pending => Color::Cyan,
                DeploymentStatus::Cancelled => Color::Yellow,
                DeploymentStatus::AddressMismatch { .. } | DeploymentStatus::Failed { .. } => Color::Red,
            };
            let details = match &outcome.status {
                DeploymentStatus::Deployed { hash } => hash.to_string(),
                DeploymentStatus::AddressMismatch { actual, .. } => format!("simulated {actual}"),
                DeploymentStatus::Failed { reason } => reason.clone(),
                _ => String::new(),
            };

            table.add_row(vec![
                Cell::new(&outcome.id),
                Cell::new(&outcome.chain),
                Cell::new(outcome.address),
                Cell::new(outcome.status.name()).fg(color),
                Cell::new(details),
            ]);
        }
        table
    }

    /// Save the report as pretty JSON.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize batch report")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write batch report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Batch report saved");
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch report from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch report from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn report() -> BatchReport {
        BatchReport {
            deployer: Create2Deployer::CreateX,
            sender: Some("external-signer".to_string()),
            order: vec!["Token".to_string()],
            deployments: vec![],
            outcomes: vec![
                PairOutcome {
                    id: "Token".to_string(),
                    chain_id: 10,
                    chain: "mainnet/op".to_string(),
                    address: Address::ZERO,
                    status: DeploymentStatus::AlreadyDeployed,
                },
                PairOutcome {
                    id: "Token".to_string(),
                    chain_id: 8453,
                    chain: "mainnet/base".to_string(),
                    address: Address::ZERO,
                    status: DeploymentStatus::Deployed {
                        hash: B256::repeat_byte(1),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_status_serialization() {
        let value = serde_json::to_value(&report().outcomes[1]).unwrap();
        assert_eq!(value["status"], json!("deployed"));
        assert_eq!(value["chainId"], json!(8453));
        assert!(value["hash"].as_str().unwrap().starts_with("0x0101"));
    }

    #[test]
    fn test_success_and_counts() {
        let mut report = report();
        assert!(report.is_success());
        assert_eq!(report.status_counts(), vec![("already-deployed", 1), ("deployed", 1)]);

        report.outcomes[0].status = DeploymentStatus::Failed {
            reason: "boom".into(),
        };
        assert!(!report.is_success());
        assert_eq!(
            report.outcome("Token", 10).unwrap().status,
            DeploymentStatus::Failed {
                reason: "boom".into()
            }
        );
    }

    #[test]
    fn test_table_has_row_per_pair() {
        let mut table = report().to_table();
        table.set_content_arrangement(ContentArrangement::Disabled).force_no_tty();
        let rendered = table.to_string();
        assert!(rendered.contains("mainnet/op"));
        assert!(rendered.contains("already-deployed"));
        assert!(rendered.contains(&B256::repeat_byte(1).to_string()));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir::TempDir::new("manydeploy-report").unwrap();
        let path = dir.path().join("report.json");

        report().save_to_file(&path).unwrap();
        assert_eq!(BatchReport::load_from_file(&path).unwrap(), report());
    }
}
