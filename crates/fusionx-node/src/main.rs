//! fusionx-node: the FusionX resolver daemon.
//!
//! Startup sequence:
//!   1. Load the JSON config and open the order-context store
//!   2. Build chain executors (EVM source, UTXO / CosmWasm destinations)
//!   3. Recover in-flight orders and start the execution engine
//!   4. Start the event monitor and the gateway JSON-RPC server
//!   5. On SIGINT, shut down topologically: intake → engine → monitors → store

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use primitive_types::H160;
use tracing::{info, warn};

use fusionx_bitcoin::{BitcoinKey, EsploraClient, HtlcExecutor, UtxoManager};
use fusionx_core::constants::{STORE_DEBOUNCE_MS, TICK_INTERVAL_SECS};
use fusionx_core::{ChainId, NodeConfig};
use fusionx_cosmos::{CosmosExecutor, HttpCosmosClient};
use fusionx_engine::{Engine, EngineDeps, EngineMessage};
use fusionx_evm::{EvmExecutor, EvmKey, HttpEvmClient};
use fusionx_monitor::EventMonitor;
use fusionx_rpc::{RpcServer, RpcServerState};
use fusionx_store::OrderStore;

#[derive(Parser, Debug)]
#[command(
    name = "fusionx-node",
    version,
    about = "FusionX resolver: cross-chain atomic-swap coordinator"
)]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, default_value = "fusionx.json")]
    config: PathBuf,

    /// Directory for persistent order state (overrides the config).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Gateway JSON-RPC listen address (overrides the config).
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fusionx=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("FusionX node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let config: NodeConfig = match std::fs::read_to_string(&args.config) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", args.config.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %args.config.display(), "config file not found; using defaults");
            NodeConfig::default()
        }
        Err(e) => return Err(e).context("reading config file"),
    };

    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| config.data_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("~/.fusionx/data"));
    let data_dir = expand_tilde(&data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let rpc_addr: SocketAddr = match args.rpc_addr {
        Some(addr) => addr,
        None => config
            .rpc_addr
            .as_deref()
            .unwrap_or("127.0.0.1:8632")
            .parse()
            .context("parsing rpc_addr")?,
    };

    // ── Order store ───────────────────────────────────────────────────────────
    let store = Arc::new(OrderStore::open(&data_dir).context("opening order store")?);

    // ── Source chain (EVM) ────────────────────────────────────────────────────
    let mut evm_rpc_for_monitor: Option<Arc<HttpEvmClient>> = None;
    let evm_executor = match &config.evm {
        Some(evm) if !evm.rpc_url.is_empty() => {
            let key = EvmKey::from_hex(&evm.key_hex)
                .map_err(|e| anyhow::anyhow!("evm key: {e}"))?;
            let rpc = Arc::new(HttpEvmClient::new(&evm.rpc_url, evm.chain_id));
            evm_rpc_for_monitor = Some(Arc::new(HttpEvmClient::new(&evm.rpc_url, evm.chain_id)));
            let executor = EvmExecutor::new(
                rpc,
                key,
                evm.chain_id,
                parse_h160(&evm.factory).context("evm.factory")?,
                parse_h160(&evm.registry).context("evm.registry")?,
                evm.gas_ceiling,
            );
            info!(chain = %evm.chain_id, address = %executor.address(), "EVM executor ready");
            Some(Arc::new(executor))
        }
        _ => {
            warn!("no EVM source chain configured");
            None
        }
    };

    // ── UTXO destination ──────────────────────────────────────────────────────
    let bitcoin_executor = match &config.bitcoin {
        Some(btc) if !btc.key_hex.is_empty() => {
            let api_url = btc
                .api_url
                .clone()
                .unwrap_or_else(|| btc.network.default_api_url().to_string());
            let api = Arc::new(EsploraClient::new(&api_url, btc.chain_id));
            let key = BitcoinKey::from_hex(&btc.key_hex)
                .map_err(|e| anyhow::anyhow!("bitcoin key: {e}"))?;
            let change_address = if btc.change_address.is_empty() {
                fusionx_bitcoin::script::p2pkh_address(&key.public_key(), btc.network)
            } else {
                btc.change_address.clone()
            };
            let utxos = Arc::new(UtxoManager::new(
                Arc::clone(&api) as Arc<dyn fusionx_bitcoin::BitcoinApi>,
                change_address.clone(),
                btc.min_confirmations,
                btc.fee_rate,
            ));
            info!(chain = %btc.chain_id, network = ?btc.network, %change_address,
                  "UTXO executor ready");
            Some(Arc::new(HtlcExecutor::new(
                api,
                utxos,
                key,
                btc.network,
                change_address,
                btc.dust_threshold,
                btc.min_timelock,
            )))
        }
        _ => None,
    };

    // ── Account-model destinations ────────────────────────────────────────────
    let mut cosmos_executors = HashMap::new();
    for (chain_str, network) in &config.cosmos {
        let chain_id = ChainId(chain_str.parse().context("cosmos chain id")?);
        if network.rpc_url.is_empty() {
            warn!(chain = %chain_id, "cosmos network has no rpc_url; skipping");
            continue;
        }
        let rpc = Arc::new(HttpCosmosClient::new(&network.rpc_url, chain_id));
        cosmos_executors.insert(
            chain_id.0,
            Arc::new(CosmosExecutor::new(rpc, chain_id, network.clone())),
        );
        info!(chain = %chain_id, contract = %network.contract, "cosmos executor ready");
    }

    // ── Event monitor (source chain reveals) ──────────────────────────────────
    let monitor = evm_rpc_for_monitor.map(|rpc| {
        let chain_id = config.evm.as_ref().map(|e| e.chain_id).unwrap_or(ChainId(0));
        Arc::new(EventMonitor::new(rpc, chain_id, config.monitor.clone(), &data_dir))
    });

    // ── Engine ────────────────────────────────────────────────────────────────
    let tick_interval = TICK_INTERVAL_SECS;
    let (engine, engine_rx) = Engine::new(EngineDeps {
        store: Arc::clone(&store),
        config,
        evm: evm_executor,
        bitcoin: bitcoin_executor,
        cosmos: cosmos_executors,
        monitor: monitor.clone(),
    });
    let inbox = engine.inbox();
    let handle = engine.handle();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    engine.recover();
    let engine_task = tokio::spawn(Arc::clone(&engine).run(engine_rx, shutdown_rx.clone()));

    // Debounced store flusher.
    let flusher_task = tokio::spawn(fusionx_store::run_flusher(
        Arc::clone(&store),
        Duration::from_millis(STORE_DEBOUNCE_MS),
        shutdown_rx.clone(),
    ));

    // Expiry ticker.
    let ticker_task = tokio::spawn(Engine::run_ticker(
        inbox.clone(),
        tick_interval,
        shutdown_rx.clone(),
    ));

    // Monitor poll loop + forwarder into the engine inbox.
    let monitor_task = monitor.map(|monitor| {
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(256);
        let poll = tokio::spawn(monitor.run(events_tx, shutdown_rx.clone()));
        let forward = tokio::spawn(Engine::run_event_forwarder(inbox.clone(), events_rx));
        (poll, forward)
    });

    // ── Gateway RPC server ────────────────────────────────────────────────────
    let rpc_handle = RpcServer::new(Arc::new(RpcServerState { engine: handle }))
        .start(rpc_addr)
        .await
        .context("starting RPC server")?;

    info!("node ready");
    tokio::signal::ctrl_c().await.context("listening for shutdown signal")?;
    info!("shutdown requested");

    // ── Topological shutdown: intake → engine → monitors → store ─────────────
    let _ = rpc_handle.stop();
    let _ = inbox.send(EngineMessage::Shutdown).await;
    let _ = shutdown_tx.send(true);

    let _ = engine_task.await;
    if let Some((poll, forward)) = monitor_task {
        let _ = poll.await;
        forward.abort();
    }
    let _ = ticker_task.await;
    let _ = flusher_task.await;
    store.flush().map_err(|e| anyhow::anyhow!("final store flush: {e}"))?;

    info!("node stopped");
    Ok(())
}

fn parse_h160(s: &str) -> anyhow::Result<H160> {
    s.trim_start_matches("0x")
        .parse()
        .map_err(|_| anyhow::anyhow!("not a 20-byte hex address: {s}"))
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
