use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnel_relayer::alert::LogAlertSink;
use tunnel_relayer::band::{BandClient, BandRpcClient};
use tunnel_relayer::chains::evm::{EvmJsonRpcConnector, EvmParams, EvmProvider};
use tunnel_relayer::chains::xrpl::{XrplJsonRpcConnector, XrplParams, XrplProvider};
use tunnel_relayer::chains::{ChainProvider, EndpointManager};
use tunnel_relayer::config::{ChainConfig, ChainSpecificConfig, RelayerConfig};
use tunnel_relayer::metrics::RelayerMetrics;
use tunnel_relayer::relay::{Scheduler, TunnelRelayer};
use tunnel_relayer::store::{MemoryStore, TransactionStore};
use tunnel_relayer::wallet::MemoryWallet;

#[derive(Parser)]
#[command(name = "relayer")]
#[command(about = "Relays BandChain tunnel packets to destination chains")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/relayer.toml")]
    pub config: String,

    /// Log level override (defaults to the configured level)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start relaying the selected tunnels
    Start {
        /// Tunnel IDs to relay (comma-separated)
        #[arg(long, conflicts_with = "tunnel_creator")]
        tunnel_ids: Option<String>,

        /// Relay every tunnel created by this address
        #[arg(long)]
        tunnel_creator: Option<String>,

        /// Relay even when the destination marks the tunnel inactive
        #[arg(long)]
        force: bool,
    },
    /// Query a signer's native balance on a destination chain
    QueryBalance {
        /// Chain name from the configuration
        #[arg(long)]
        chain: String,
        /// Key name within the chain's wallet
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RelayerConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.global.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(&log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("loaded configuration from {}", cli.config);

    match cli.command {
        Commands::Start {
            tunnel_ids,
            tunnel_creator,
            force,
        } => start_relayer(config, tunnel_ids, tunnel_creator, force).await,
        Commands::QueryBalance { chain, key } => query_balance(config, &chain, &key).await,
    }
}

/// Default filter when `RUST_LOG` is unset. Library events carry the
/// `tunnel_relayer` target, binary events the `relayer` target.
fn default_log_filter(log_level: &str) -> String {
    format!("tunnel_relayer={log_level},relayer={log_level}")
}

/// Build the provider for one configured chain. Signers come from the
/// `RELAYER_KEYS_<CHAIN>` environment variable (the keystore layer's contract)
/// as `name:address:private_key` entries.
fn build_provider(
    chain_name: &str,
    chain: &ChainConfig,
    liveliness_interval: Duration,
    store: Arc<dyn TransactionStore>,
    alerts: Arc<LogAlertSink>,
) -> anyhow::Result<Arc<dyn ChainProvider>> {
    let env_key = format!(
        "RELAYER_KEYS_{}",
        chain_name.to_uppercase().replace('-', "_")
    );
    let spec = std::env::var(&env_key)
        .with_context(|| format!("no signers for {chain_name}: set {env_key}"))?;
    let wallet = Arc::new(MemoryWallet::from_spec(&spec)?);

    let query_timeout = Duration::from_secs(chain.query_timeout_secs);
    let execute_timeout = Duration::from_secs(chain.execute_timeout_secs);
    let retry_delay = Duration::from_millis(chain.retry_delay_ms);

    let provider: Arc<dyn ChainProvider> = match &chain.specific {
        ChainSpecificConfig::Evm {
            chain_id_num,
            router_address,
            gas_limit,
            gas_multiplier,
        } => {
            let endpoints = EndpointManager::new(
                chain_name,
                chain.endpoints.clone(),
                query_timeout,
                EvmJsonRpcConnector::new(query_timeout, execute_timeout),
            );
            Arc::new(EvmProvider::new(
                chain_name,
                EvmParams {
                    chain_id: *chain_id_num,
                    router_address: router_address.clone(),
                    gas_limit: *gas_limit,
                    gas_multiplier: *gas_multiplier,
                },
                chain.max_retry,
                retry_delay,
                liveliness_interval,
                endpoints,
                wallet,
                store,
                alerts,
            )?)
        }
        ChainSpecificConfig::Xrpl {
            price_scale,
            fee,
            sequence_interval,
            oracle_document_id,
        } => {
            let endpoints = EndpointManager::new(
                chain_name,
                chain.endpoints.clone(),
                query_timeout,
                XrplJsonRpcConnector::new(query_timeout, execute_timeout),
            );
            Arc::new(XrplProvider::new(
                chain_name,
                XrplParams {
                    price_scale: *price_scale,
                    fee: *fee,
                    sequence_interval: *sequence_interval,
                    oracle_document_id: *oracle_document_id,
                },
                chain.max_retry,
                retry_delay,
                liveliness_interval,
                endpoints,
                wallet,
                store,
                alerts,
            )?)
        }
    };
    Ok(provider)
}

async fn start_relayer(
    config: RelayerConfig,
    tunnel_ids: Option<String>,
    tunnel_creator: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let band: Arc<dyn BandClient> = Arc::new(BandRpcClient::new(
        &config.band.endpoint,
        Duration::from_secs(config.band.timeout_secs),
    )?);

    let tunnel_ids: Vec<u64> = match (tunnel_ids, tunnel_creator) {
        (Some(ids), None) => ids
            .split(',')
            .map(|id| id.trim().parse::<u64>().context("invalid tunnel id"))
            .collect::<anyhow::Result<_>>()?,
        (None, Some(creator)) => band
            .get_tunnels_by_creator(&creator)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect(),
        (None, None) | (Some(_), Some(_)) => {
            bail!("specify either --tunnel-ids or --tunnel-creator")
        }
    };
    if tunnel_ids.is_empty() {
        bail!("no tunnels selected");
    }

    let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
    let alerts = Arc::new(LogAlertSink::new());
    let metrics = Arc::new(RelayerMetrics::new()?);
    let liveliness_interval = Duration::from_secs(config.global.liveliness_check_interval_secs);
    let checking_packet_interval = Duration::from_secs(config.global.checking_packet_interval_secs);

    let mut providers: HashMap<String, Arc<dyn ChainProvider>> = HashMap::new();
    let mut relayers = Vec::new();
    for tunnel_id in tunnel_ids {
        let tunnel = band.get_tunnel(tunnel_id).await?;
        let chain_name = tunnel.target_chain_id.clone();
        let provider = match providers.get(&chain_name) {
            Some(provider) => Arc::clone(provider),
            None => {
                let chain = config
                    .get_chain(&chain_name)
                    .with_context(|| format!("chain {chain_name} not configured"))?;
                let provider =
                    build_provider(&chain_name, chain, liveliness_interval, Arc::clone(&store), Arc::clone(&alerts))?;
                providers.insert(chain_name.clone(), Arc::clone(&provider));
                provider
            }
        };
        relayers.push(TunnelRelayer::new(
            tunnel_id,
            &tunnel.target_address,
            checking_packet_interval,
            force,
            Arc::clone(&band),
            provider,
            Arc::clone(&metrics),
        ));
    }

    let mut scheduler = Scheduler::new(relayers);

    for (chain_name, provider) in &providers {
        provider
            .init(scheduler.subscribe_shutdown())
            .await
            .with_context(|| format!("initializing provider for {chain_name}"))?;
    }

    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.stop().await;

    Ok(())
}

async fn query_balance(config: RelayerConfig, chain_name: &str, key: &str) -> anyhow::Result<()> {
    let chain = config
        .get_chain(chain_name)
        .with_context(|| format!("chain {chain_name} not configured"))?;
    let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
    let alerts = Arc::new(LogAlertSink::new());
    let provider = build_provider(
        chain_name,
        chain,
        Duration::from_secs(config.global.liveliness_check_interval_secs),
        store,
        alerts,
    )?;

    let balance = provider.query_balance(key).await?;
    println!("{key}@{chain_name}: {balance}");
    Ok(())
}
