use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use manydeploy_core::Create2Deployer;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "manydeploy")]
#[command(
    author,
    version,
    about = "Deploy contracts to the same address on many chains"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "MANYDEPLOY_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the settings file (RPC overrides, retries, timeouts).
    ///
    /// Defaults to ./Manydeploy.toml. A missing file is not an error.
    #[arg(long, alias = "conf", env = "MANYDEPLOY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute the deterministic address of a single contract.
    ComputeAddress(ComputeAddressArgs),
    /// Resolve a batch and run the pre-flight checks without sending anything.
    Plan(PlanArgs),
    /// Deploy a batch.
    Deploy(DeployArgs),
}

#[derive(Debug, Args)]
pub struct ComputeAddressArgs {
    /// Path to the forge artifact (out/<File>.sol/<Contract>.json).
    #[arg(long, alias = "artifact")]
    pub forge_artifact_path: PathBuf,

    /// Salt: a 0x-prefixed bytes32 or a string of at most 32 bytes.
    #[arg(long)]
    pub salt: String,

    /// Constructor arguments as a JSON array, e.g. '["hello", 42]'.
    #[arg(long, default_value = "[]")]
    pub constructor_args: String,

    /// Account submitting the deployment, for sender-protected CreateX salts.
    #[arg(long)]
    pub sender: Option<Address>,

    #[arg(long, env = "MANYDEPLOY_DEPLOYER", default_value_t = Create2Deployer::CreateX)]
    pub deployer: Create2Deployer,
}

/// Options shared by `plan` and `deploy`.
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Path to the batch TOML file.
    #[arg(short, long, env = "MANYDEPLOY_TOML")]
    pub toml: PathBuf,

    /// The CREATE2 deployer contract.
    #[arg(long, env = "MANYDEPLOY_DEPLOYER", default_value_t = Create2Deployer::CreateX)]
    pub deployer: Create2Deployer,

    /// Override the RPC URL of a chain, as <chain-id>=<url>. Repeatable.
    #[arg(long = "rpc-url", value_parser = parse_rpc_override)]
    pub rpc_urls: Vec<(u64, Url)>,

    /// Write the JSON batch report to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Account that will submit the deployments.
    ///
    /// Needed for sender-protected CreateX salts, which otherwise plan to a
    /// different address than `deploy` would use.
    #[arg(long, env = "MANYDEPLOY_SENDER")]
    pub sender: Option<Address>,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// How transactions get signed. Exactly one is required.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct SignerArgs {
    /// Sign locally with this private key.
    #[arg(long, alias = "pk", env = "MANYDEPLOY_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Send through the sponsored sender relay with this API key.
    #[arg(long, env = "MANYDEPLOY_SPONSORED_API_KEY", hide_env_values = true)]
    pub sponsored_api_key: Option<String>,

    /// Send through a wallet RPC accepting eth_sendTransaction.
    /// `{chain_id}` in the URL is replaced by the target chain id.
    #[arg(long)]
    pub wallet_rpc: Option<String>,

    /// Print each transaction and wait for `<task-id> <tx-hash>` lines on stdin.
    #[arg(long)]
    pub external_signer: bool,
}

fn parse_rpc_override(raw: &str) -> Result<(u64, Url), String> {
    let (chain_id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <chain-id>=<url>, got '{raw}'"))?;
    let chain_id = chain_id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid chain id '{chain_id}': {e}"))?;
    let url = url.trim().parse::<Url>().map_err(|e| format!("invalid url '{url}': {e}"))?;
    Ok((chain_id, url))
}
