//! Circuit protocol keeper
//!
//! Watches a Circuit deployment through its RPC service and keeps it healthy:
//! - Starts liquidation auctions for under-collateralised vaults
//! - Recovers bad debt from the treasury
//! - Bids in collateral, recharge and surplus auctions within operator bounds
//! - Rebalances the treasury, distributes registry rewards, transfers fees
//! - Splits large wallet coins into bid-sized pieces

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_api::{CircuitClient, MarketClient};
use keeper_chain::{FeePolicy, KeyMaterial, RpcFeeEstimator, Signer, WalletSigner};
use keeper_core::{
    lock, BidOrdering, CircuitGateway, Keeper, KeeperConfig, ProgressMode, ProgressReporter,
    SystemClock,
};

/// Environment variable names read directly by the binary.
mod env {
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const SIGNER_URL: &str = "SIGNER_URL";
}

const DEFAULT_SIGNER_URL: &str = "http://127.0.0.1:9256";

/// Ceiling on any fee rate reported by the RPC service.
const MAX_FEE_PER_COST: u64 = 1_000;

#[derive(Parser, Debug)]
#[command(name = "circuit-keeper", version, about = "Keeper for the Circuit protocol")]
struct Cli {
    /// RPC service URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory holding the instance lock
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fee policy: fast, medium or an explicit fee per cost
    #[arg(long, global = true)]
    fee_per_cost: Option<FeePolicy>,

    /// Do not wait for transactions to confirm
    #[arg(long, global = true)]
    no_wait: bool,

    /// Progress events: off, text or json
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    /// Hex-encoded 32-byte private key
    #[arg(long, global = true, env = env::PRIVATE_KEY, hide_env_values = true)]
    private_key: Option<String>,

    /// Local wallet daemon used for signing
    #[arg(long, global = true, env = env::SIGNER_URL, default_value = DEFAULT_SIGNER_URL)]
    signer_url: String,

    /// Market ticker used as the collateral reference price
    #[arg(long, global = true)]
    market_price_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the keeper loop
    Liquidator(LiquidatorArgs),

    /// Maintenance of the keeper itself
    #[command(name = "self", subcommand)]
    SelfCmd(SelfCommand),
}

#[derive(Args, Debug)]
struct LiquidatorArgs {
    /// Largest lot to bid for in one offer (base units)
    #[arg(long)]
    max_bid_amount: Option<u64>,

    /// Minimum discount to the reference price, e.g. 0.1 for 10%
    #[arg(long)]
    min_discount: Option<f64>,

    /// Run a single iteration and exit
    #[arg(long)]
    run_once: bool,

    /// Largest amount offered in one bid (base units)
    #[arg(long)]
    max_offer_amount: Option<u64>,

    /// Lifetime of a bid offer
    #[arg(long = "offer-expiry-seconds")]
    offer_expiry_secs: Option<u64>,

    /// Delay between iterations in continuous mode
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Order in which auctions are bid on: smallest-first, largest-first, as-listed
    #[arg(long)]
    bid_ordering: Option<BidOrdering>,
}

#[derive(Subcommand, Debug)]
enum SelfCommand {
    /// Remove a lock left behind by a crashed keeper
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;

    match &cli.command {
        Command::Liquidator(_) => run_liquidator(&cli, config).await,
        Command::SelfCmd(SelfCommand::Unlock) => {
            let dir = &config.keeper.data_dir;
            if lock::force_clear(dir)? {
                println!("Removed instance lock in {}", dir.display());
            } else {
                println!("No instance lock in {}", dir.display());
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(cli: &Cli) -> Result<KeeperConfig> {
    let mut config = match &cli.config {
        Some(path) => KeeperConfig::from_file(path)?,
        None => KeeperConfig::default(),
    };
    config.apply_env()?;

    if let Some(url) = &cli.base_url {
        config.rpc.base_url = url.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.keeper.data_dir = dir.clone();
    }
    if let Some(policy) = cli.fee_per_cost {
        config.pipeline.fee_policy = policy;
    }
    if cli.no_wait {
        config.pipeline.no_wait = true;
    }
    if let Some(mode) = cli.progress {
        config.progress = mode;
    }
    if let Some(url) = &cli.market_price_url {
        config.market.price_url = Some(url.clone());
    }

    if let Command::Liquidator(args) = &cli.command {
        let bounds = &mut config.bounds;
        if let Some(v) = args.max_bid_amount {
            bounds.max_bid_amount = v;
        }
        if let Some(v) = args.min_discount {
            bounds.min_discount = v;
        }
        if let Some(v) = args.max_offer_amount {
            bounds.max_offer_amount = v;
        }
        if let Some(v) = args.offer_expiry_secs {
            bounds.offer_expiry_secs = v;
        }
        if let Some(v) = args.bid_ordering {
            bounds.bid_ordering = v;
        }
        if let Some(v) = args.interval_secs {
            config.keeper.interval_secs = v;
        }
        if args.run_once {
            config.keeper.run_once = true;
        }
    }

    config.validate()?;
    Ok(config)
}

async fn run_liquidator(cli: &Cli, config: KeeperConfig) -> Result<()> {
    config.log_config();

    let Some(raw_key) = cli.private_key.as_deref() else {
        bail!("no private key: pass --private-key or set {}", env::PRIVATE_KEY);
    };
    let key = KeyMaterial::from_hex(raw_key).context("invalid private key")?;

    let timeout = config.rpc.request_timeout();
    let signer = Arc::new(
        WalletSigner::new(&cli.signer_url, timeout).context("configuring wallet signer")?,
    );
    let public_key = signer
        .public_key(&key)
        .await
        .context("deriving wallet public key")?;

    let client = CircuitClient::with_timeout(&config.rpc.base_url, timeout);
    let mut gateway = CircuitGateway::new(client.clone()).with_wallet(public_key);
    if let Some(url) = &config.market.price_url {
        gateway = gateway.with_market(MarketClient::with_timeout(
            url.as_str(),
            config.market.price_scale,
            timeout,
        ));
    }
    let gateway = Arc::new(gateway);
    let fee_estimator = Arc::new(RpcFeeEstimator::new(client, MAX_FEE_PER_COST));
    let clock = Arc::new(SystemClock);
    let progress = Arc::new(ProgressReporter::new(config.progress, clock.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current iteration");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Cannot listen for interrupt"),
        }
    });

    let mut keeper =
        Keeper::assemble(config, gateway, signer, fee_estimator, clock, progress, key).await?;
    let summary = keeper.run(shutdown_rx).await?;

    info!(
        iterations = summary.iterations,
        failed_polls = summary.failed_polls,
        "Liquidator finished"
    );
    Ok(())
}
