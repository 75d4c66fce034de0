//! manydeploy deploys contracts to the same CREATE2 address on many chains.

mod cli;

use std::sync::Arc;

use alloy_core::primitives::B256;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use cli::{BatchArgs, Cli, Command, ComputeAddressArgs, DeployArgs, PlanArgs, SignerArgs};
use manydeploy_core::{
    AddressComputer, BatchConfig, BatchReport, ChainConfig, ConstructorArg, CustomRpcSender,
    DeploymentIntent, ExecutionStrategy, ExternalSigner, ExternalTaskStore, ForgeArtifact,
    HttpChainRpc, Orchestrator, PrivateKeySender, Settings, WalletEndpoint, resolve,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::ComputeAddress(args) => compute_address(args),
        Command::Plan(args) => plan(&settings, args).await,
        Command::Deploy(args) => deploy(&settings, args).await,
    }
}

fn compute_address(args: ComputeAddressArgs) -> Result<()> {
    let artifact = Arc::new(ForgeArtifact::load_from_file(&args.forge_artifact_path)?);
    let raw_args: Vec<serde_json::Value> =
        serde_json::from_str(&args.constructor_args).context("Constructor arguments must be a JSON array")?;

    let mut intent = DeploymentIntent::new(
        args.forge_artifact_path.display().to_string(),
        args.salt,
        artifact,
    );
    for arg in raw_args {
        intent = intent.arg(ConstructorArg::parse(arg)?);
    }

    let computer = AddressComputer::new(args.deployer).with_sender(args.sender);
    let resolution = resolve(&[intent], &computer)?;
    let Some(deployment) = resolution.deployments.first() else {
        anyhow::bail!("Nothing to compute");
    };

    tracing::debug!(
        raw_salt = %deployment.computed.raw_salt,
        guarded_salt = %deployment.computed.guarded_salt,
        deployer = %args.deployer,
        "Computed deployment parameters"
    );
    println!("{}", deployment.computed.deterministic_address);
    Ok(())
}

/// Everything a batch command needs before talking to a chain.
struct LoadedBatch {
    intents: Vec<DeploymentIntent>,
    chains: Vec<ChainConfig>,
    rpc: Arc<HttpChainRpc>,
}

fn load_batch(settings: &Settings, args: &BatchArgs) -> Result<LoadedBatch> {
    let batch = BatchConfig::load_from_file(&args.toml)?;
    let intents = batch.intents()?;

    let registry = settings.registry()?.with_rpc_overrides(args.rpc_urls.iter().cloned());
    let chains = batch.chains(&registry)?;

    tracing::info!(
        toml = %args.toml.display(),
        network = %batch.network,
        contracts = intents.len(),
        chains = ?chains.iter().map(|c| c.identifier.as_str()).collect::<Vec<_>>(),
        "Loaded batch"
    );

    let rpc = HttpChainRpc::new(
        chains.iter().map(|c| (c.chain_id, c.rpc_url.clone())),
        settings.retry.into(),
        settings.request_timeout(),
    )?
    .with_receipt_polling(settings.poll_interval(), settings.receipt_timeout());

    Ok(LoadedBatch {
        intents,
        chains,
        rpc: Arc::new(rpc),
    })
}

async fn plan(settings: &Settings, args: PlanArgs) -> Result<()> {
    let batch = load_batch(settings, &args.batch)?;
    let computer = AddressComputer::new(args.batch.deployer).with_sender(args.sender);

    // Nothing is sent, the sender only matters for its identity.
    let store = ExternalTaskStore::new();
    let sender = ExternalSigner::new(store, batch.rpc.clone());
    let orchestrator = Orchestrator::new(batch.rpc.clone(), Arc::new(sender), computer);

    let report = orchestrator.plan_batch(&batch.intents, &batch.chains).await?;
    finish(&report, &args.batch)
}

async fn deploy(settings: &Settings, args: DeployArgs) -> Result<()> {
    let batch = load_batch(settings, &args.batch)?;
    let mut computer = AddressComputer::new(args.batch.deployer);
    let mut store = None;

    let strategy = match args.signer {
        SignerArgs {
            private_key: Some(key),
            ..
        } => {
            let sender = PrivateKeySender::from_private_key(&key, batch.rpc.clone())?;
            computer = computer.with_sender(Some(sender.address()));
            ExecutionStrategy::PrivateKey(sender)
        }
        SignerArgs {
            sponsored_api_key: Some(api_key),
            ..
        } => ExecutionStrategy::CustomRpc(
            CustomRpcSender::new(
                WalletEndpoint::Sponsored { api_key },
                batch.rpc.clone(),
                settings.request_timeout(),
            )?
            .with_receipt_wait(settings.wallet_receipt_wait),
        ),
        SignerArgs {
            wallet_rpc: Some(url_template),
            ..
        } => ExecutionStrategy::CustomRpc(
            CustomRpcSender::new(
                WalletEndpoint::Custom { url_template },
                batch.rpc.clone(),
                settings.request_timeout(),
            )?
            .with_receipt_wait(settings.wallet_receipt_wait),
        ),
        SignerArgs {
            external_signer: true,
            ..
        } => {
            let tasks = ExternalTaskStore::new();
            tokio::spawn(read_completions(tasks.clone()));
            store = Some(tasks.clone());
            ExecutionStrategy::External(ExternalSigner::new(tasks, batch.rpc.clone()))
        }
        _ => anyhow::bail!("No signer selected"),
    };

    let orchestrator = Arc::new(Orchestrator::new(batch.rpc.clone(), Arc::new(strategy), computer));

    let on_interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        })
    };

    let result = orchestrator.deploy_batch(&batch.intents, &batch.chains).await;
    on_interrupt.abort();
    if let Some(store) = store {
        store.close().await;
    }

    finish(&result?, &args.batch)
}

/// Feed `<task-id> <tx-hash>` lines from stdin into the external task store.
async fn read_completions(store: ExternalTaskStore) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read from stdin");
                return;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = line.split_once(char::is_whitespace).and_then(|(id, hash)| {
            Some((id.trim().parse::<u64>().ok()?, hash.trim().parse::<B256>().ok()?))
        });
        let Some((task_id, hash)) = parsed else {
            tracing::warn!(%line, "Expected '<task-id> <tx-hash>'");
            continue;
        };

        if let Err(e) = store.complete(task_id, hash).await {
            tracing::warn!(error = %e, "Failed to complete task");
        }
    }
}

fn finish(report: &BatchReport, args: &BatchArgs) -> Result<()> {
    println!("{}", report.to_table());

    if let Some(path) = &args.output {
        report.save_to_file(path)?;
    }

    let counts = report
        .status_counts()
        .into_iter()
        .map(|(name, count)| format!("{count} {name}"))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::info!(%counts, "Batch finished");

    if !report.is_success() {
        anyhow::bail!("Some deployments did not succeed ({counts})");
    }
    Ok(())
}
