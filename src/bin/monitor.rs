use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use miner_monitor::{
    EventBus,
    actors::{
        registration::RegistrationBridge,
        scheduler::{SchedulerHandle, seed_targets},
        wallet_monitor::WalletMonitorHandle,
    },
    config::{ResolvedConfig, read_config_file},
    probe::TcpProbe,
    proxy::ProxyMonitor,
    state::WalletState,
    util::unix_now,
    wallet::WalletClient,
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log everything down to wire level
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![("miner_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?
        .resolve()
        .context("invalid configuration")?;

    run(config).await
}

async fn run(config: ResolvedConfig) -> anyhow::Result<()> {
    let bus = EventBus::new();

    #[cfg(feature = "api")]
    {
        if let Some(api) = &config.api {
            let state = miner_monitor::api::DashboardState::spawn(
                bus.clone(),
                std::time::Duration::from_secs(api.ping),
            );
            miner_monitor::api::spawn_api_server(api, state).await?;
        }
    }

    let wallet = match &config.wallet {
        Some(wallet) => {
            let client = WalletClient::new(
                wallet.url.clone(),
                wallet.b58_pubkey.clone(),
                wallet.timeout,
            )?;
            info!("monitoring wallet at {}", client.url());
            let state = WalletState::new(wallet.url.clone(), wallet.b58_pubkey.clone(), unix_now());
            Some(WalletMonitorHandle::spawn(
                Arc::new(client),
                state,
                wallet.interval,
                bus.clone(),
            ))
        }
        None => None,
    };

    let targets = seed_targets(&config.discoveries, &config.servers);
    info!("monitoring {} targets", targets.len());
    let scheduler = SchedulerHandle::spawn(
        targets.into_values(),
        Arc::new(TcpProbe::new(config.watchdog_multiplier)),
        bus.clone(),
    );

    let bridge = RegistrationBridge::spawn(&bus, scheduler.clone());

    let proxy = match &config.proxy {
        Some(proxy) => Some(ProxyMonitor::bind(proxy, bus.clone()).await?.spawn()),
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Some(proxy) = proxy {
        proxy.abort();
    }
    bridge.abort();

    if let Err(e) = scheduler.shutdown().await {
        warn!("{e:#}");
    }
    if let Some(wallet) = wallet
        && let Err(e) = wallet.shutdown().await
    {
        warn!("{e:#}");
    }

    debug!("bye");
    Ok(())
}
