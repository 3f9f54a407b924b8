use anyhow::Context;
use clap::Parser;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tranche_keeper::config::create_example_config;
use tranche_keeper::status;
use tranche_keeper::{
    load_keypair, ChainClient, EpochCloser, IpfsRegistrySource, KeeperConfig, PoolRegistry, Scheduler,
    SolanaChainClient, StatusBoard,
};

#[derive(Parser, Debug)]
#[command(name = "tranche-keeper")]
#[command(about = "Closes, solves and executes lending pool epochs")]
struct Args {
    /// Path to keeper configuration file
    #[arg(short, long, default_value = "keeper.toml")]
    config: String,

    /// Keeper keypair file path, overrides signer.keypair_path
    #[arg(short, long)]
    keypair: Option<String>,

    /// RPC URL for Solana cluster, overrides chain.rpc_url
    #[arg(short, long)]
    rpc_url: Option<String>,

    /// Dry run mode - solve but don't submit transactions
    #[arg(long)]
    dry_run: bool,

    /// Refresh the registry and sweep once, then exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write an example configuration file and exit
    #[arg(long, value_name = "PATH")]
    write_example_config: Option<String>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tranche_keeper={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(path) = &args.write_example_config {
        create_example_config(path)?;
        info!("Wrote example configuration to {}", path);
        return Ok(());
    }

    info!("Starting tranche keeper");

    let mut config = KeeperConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    if let Some(keypair) = args.keypair {
        config.signer.keypair_path = keypair;
    }
    if let Some(rpc_url) = args.rpc_url {
        config.chain.rpc_url = rpc_url;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    config.validate()?;

    info!("RPC URL: {}", config.chain.rpc_url);
    info!("Program: {}", config.chain.program_id);
    info!("Registry: {}", config.registry.document_url());
    if config.dry_run {
        warn!("Running in DRY RUN mode - no transactions will be submitted");
    }

    // Without a signer nothing can ever be submitted
    let keypair = Arc::new(load_keypair(&config.signer.keypair_path)?);
    info!("Keeper authority: {}", keypair.pubkey());

    let chain: Arc<dyn ChainClient> = Arc::new(SolanaChainClient::new(&config, keypair));
    match chain.health_check().await {
        Ok(report) if report.low_balance() => warn!(
            balance = report.balance_lamports,
            minimum = report.min_balance_lamports,
            "Keeper balance is below the configured minimum"
        ),
        Ok(report) => info!(balance = report.balance_lamports, "Node healthy"),
        Err(e) => warn!("Health check warning: {}", e),
    }

    let source = Arc::new(IpfsRegistrySource::new(&config.registry)?);
    let registry = Arc::new(PoolRegistry::new(source, config.registry.retry.clone()));
    let status_board = StatusBoard::new();
    let closer = Arc::new(EpochCloser::new(
        chain.clone(),
        status_board.clone(),
        config.dry_run,
        config.max_concurrent_pools,
    ));
    let scheduler = Arc::new(Scheduler::new(
        registry,
        closer,
        chain,
        status_board.clone(),
        &config.schedule,
    )?);

    if args.once {
        if let Some(Err(e)) = scheduler.trigger_refresh().await {
            return Err(e).context("registry refresh failed");
        }
        if let Some(report) = scheduler.trigger_sweep().await {
            for pool in &report.reports {
                info!(pool = %pool.pool, name = %pool.name, "{}", pool.action);
            }
        }
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    let server = match config.status.socket_addr()? {
        Some(addr) => Some(tokio::spawn(status::serve(status_board, addr, shutdown_tx.subscribe()))),
        None => None,
    };
    let runner = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, waiting for running jobs");
    let _ = shutdown_tx.send(());

    runner.await?;
    if let Some(server) = server {
        if let Err(e) = server.await? {
            error!("Status server error: {}", e);
        }
    }

    info!("Keeper stopped");
    Ok(())
}
