//! End-to-end swap scenarios driven entirely through mock chains.
//!
//! Each test builds a full engine (store on a temp dir, EVM + Bitcoin
//! executors over scriptable mocks, event monitor) and walks one order
//! through the state machine: happy UTXO path, expiry refund, crash
//! recovery, insufficient funds, duplicate reveals, and a source-chain
//! reorg after the reveal was emitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use fusionx_bitcoin::{
    htlc_redeem_script, p2sh_address, ApiUtxo, BitcoinKey, HtlcExecutor, HtlcScriptParams,
    MockBitcoinApi, UtxoManager,
};
use fusionx_core::{
    BitcoinConfig, BitcoinNetwork, ChainId, DstParams, EvmConfig, ExecutionConfig, Hashlock,
    MonitorConfig, NewOrder, NodeConfig, OrderContext, OrderHash, OrderStatus, Secret, SwapError,
    TxId, TxRef,
};
use fusionx_engine::{Engine, EngineDeps, EngineHandle, EngineMessage};
use fusionx_evm::{EvmExecutor, EvmKey, EvmLog, MockEvmRpc};
use fusionx_monitor::EventMonitor;
use fusionx_store::OrderStore;
use primitive_types::{H160, U256};

const BTC_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const EVM_KEY: &str = "4646464646464646464646464646464646464646464646464646464646464646";
const WALLET: &str = "resolver-wallet";
const BTC_TIP: u64 = 2_580_000;

struct Harness {
    evm: MockEvmRpc,
    btc: MockBitcoinApi,
    handle: EngineHandle,
    inbox: mpsc::Sender<EngineMessage>,
    monitor: Arc<EventMonitor>,
    store: Arc<OrderStore>,
    shutdown: watch::Sender<bool>,
    dir: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "fusionx_flows_{tag}_{}_{}",
        std::process::id(),
        rand::random::<u32>()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn resolver_pubkey() -> [u8; 33] {
    BitcoinKey::from_hex(BTC_KEY).unwrap().public_key()
}

fn change_address() -> String {
    fusionx_bitcoin::script::p2pkh_address(&resolver_pubkey(), BitcoinNetwork::Testnet)
}

fn node_config(min_expiry_lead: i64) -> NodeConfig {
    NodeConfig {
        data_dir: None,
        rpc_addr: None,
        bitcoin: Some(BitcoinConfig {
            chain_id: ChainId(40004),
            network: BitcoinNetwork::Testnet,
            api_url: None,
            fee_rate: 2,
            htlc_timelock: 144,
            min_timelock: 144,
            min_confirmations: 1,
            dust_threshold: 546,
            key_hex: BTC_KEY.into(),
            change_address: change_address(),
        }),
        evm: Some(EvmConfig {
            chain_id: ChainId(11155111),
            rpc_url: String::new(),
            factory: String::new(),
            registry: String::new(),
            key_hex: EVM_KEY.into(),
            gas_ceiling: 500_000,
        }),
        cosmos: HashMap::new(),
        execution: ExecutionConfig {
            retry_attempts: 2,
            retry_delay_ms: 10,
            step_timeout_secs: 30,
            timeout_seconds: 3_600,
            min_expiry_lead_secs: min_expiry_lead,
        },
        monitor: MonitorConfig { poll_interval_secs: 1, confirmation_depth: 2, reorg_depth: 6 },
    }
}

fn build_harness(tag: &str, min_expiry_lead: i64) -> Harness {
    let dir = temp_dir(tag);
    let evm = MockEvmRpc::new(100);
    let btc = MockBitcoinApi::new(BTC_TIP, 2);

    let config = node_config(min_expiry_lead);
    let store = Arc::new(OrderStore::open(&dir).unwrap());

    let evm_executor = Arc::new(EvmExecutor::new(
        Arc::new(evm.clone()),
        EvmKey::from_hex(EVM_KEY).unwrap(),
        ChainId(11155111),
        H160::from_low_u64_be(0xFAC),
        H160::from_low_u64_be(0x4E9),
        500_000,
    ));
    let utxos = Arc::new(UtxoManager::new(Arc::new(btc.clone()), WALLET, 1, 2));
    let btc_executor = Arc::new(HtlcExecutor::new(
        Arc::new(btc.clone()),
        utxos,
        BitcoinKey::from_hex(BTC_KEY).unwrap(),
        BitcoinNetwork::Testnet,
        change_address(),
        546,
        144,
    ));
    let monitor = Arc::new(EventMonitor::new(
        Arc::new(evm.clone()),
        ChainId(11155111),
        config.monitor.clone(),
        &dir,
    ));

    let (engine, rx) = Engine::new(EngineDeps {
        store: Arc::clone(&store),
        config,
        evm: Some(evm_executor),
        bitcoin: Some(btc_executor),
        cosmos: HashMap::new(),
        monitor: Some(Arc::clone(&monitor)),
    });
    let handle = engine.handle();
    let inbox = engine.inbox();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    engine.recover();
    tokio::spawn(engine.run(rx, shutdown_rx));

    Harness { evm, btc, handle, inbox, monitor, store, shutdown: shutdown_tx, dir }
}

fn wallet_utxo(byte: u8, value: u64) -> ApiUtxo {
    ApiUtxo { txid: TxId::new(hex::encode([byte; 32])), vout: 0, value, confirmations: 6 }
}

fn utxo_order(expiry: i64) -> NewOrder {
    NewOrder {
        order_hash: OrderHash::from_hex(
            "aa00000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap(),
        src_chain_id: ChainId(11155111),
        dst_chain_id: ChainId(40004),
        maker: "0x1111111111111111111111111111111111111111".into(),
        src_token: "0x2222222222222222222222222222222222222222".into(),
        dst_token: "BTC".into(),
        src_amount: 1_000_000_000_000_000_000,
        dst_amount: 10_000,
        hashlock: Hashlock::of(&Secret::from_bytes([0xDE; 32])),
        expiry_time: expiry,
        dst_params: DstParams::Utxo {
            recipient_pubkey: hex::encode(resolver_pubkey()),
            timelock_blocks: 144,
            fee_rate: Some(2),
        },
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn wait_for_status(
    handle: &EngineHandle,
    order_hash: &OrderHash,
    status: OrderStatus,
) -> OrderContext {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(ctx) = handle.status(order_hash) {
            if ctx.status == status {
                return ctx;
            }
            assert!(
                !(ctx.status.is_terminal() && ctx.status != status),
                "order reached terminal {:?} while waiting for {:?} (error: {:?})",
                ctx.status,
                status,
                ctx.error
            );
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Drive an order into `htlc_funded`: wait for the funding broadcast,
/// confirm it, and let the ticker pick it up.
async fn fund_order(harness: &Harness, order_hash: &OrderHash) -> OrderContext {
    let ctx = wait_for_status(&harness.handle, order_hash, OrderStatus::HtlcCreated).await;
    let funding_txid = ctx.bitcoin.as_ref().unwrap().funding_txid.clone().unwrap();
    harness.btc.set_confirmations(&funding_txid, 1);
    harness.inbox.send(EngineMessage::Tick).await.unwrap();
    let ctx = wait_for_status(&harness.handle, order_hash, OrderStatus::HtlcFunded).await;
    // Let the same worker finish the funded step (monitor registration).
    tokio::time::sleep(Duration::from_millis(150)).await;
    ctx
}

/// Poll the monitor once and pump its events into the engine inbox.
async fn pump_monitor(harness: &Harness) {
    let (events, stable) = harness.monitor.poll_once().await.unwrap();
    for event in events {
        harness
            .inbox
            .send(EngineMessage::SecretRevealed {
                order_hash: event.order_hash,
                secret: event.secret,
                tx_ref: event.tx_ref,
            })
            .await
            .unwrap();
    }
    harness.monitor.ack(stable);
}

fn push_reveal(evm: &MockEvmRpc, order_hash: &OrderHash, secret: &Secret, block: u64, tx: &str) {
    let (topics, data) = fusionx_evm::abi::encode_secret_revealed(order_hash, secret);
    evm.push_log(EvmLog {
        address: H160::zero(),
        topics,
        data,
        block_number: block,
        tx_hash: TxId::new(tx.to_string()),
        log_index: 0,
    });
}

// ── S1: happy UTXO path ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn happy_utxo_path_reaches_claimed() {
    let harness = build_harness("s1", 600);
    harness.btc.add_utxo(WALLET, wallet_utxo(1, 200_000));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    let (_, status) = harness.handle.submit(order).await.unwrap();
    assert_eq!(status, OrderStatus::Pending);

    let ctx = fund_order(&harness, &order_hash).await;
    let info = ctx.bitcoin.clone().unwrap();
    assert!(info.htlc_address.is_some());
    assert!(ctx.match_txid.is_some(), "source order must be matched");
    assert!(ctx.settle_txid.is_some(), "source tokens must be settled");
    assert_eq!(harness.btc.broadcasts().len(), 1);
    assert_eq!(harness.monitor.watched(), 1);

    // Maker reveals the preimage on the source chain.
    let secret = Secret::from_bytes([0xDE; 32]);
    push_reveal(&harness.evm, &order_hash, &secret, 95, "0xrevealtx");
    pump_monitor(&harness).await;

    let ctx = wait_for_status(&harness.handle, &order_hash, OrderStatus::Claimed).await;
    let info = ctx.bitcoin.unwrap();
    assert!(info.claiming_txid.is_some(), "claim txid must be persisted");
    assert!(ctx.complete_txid.is_some(), "source completion must be sent");
    // Funding + claim on the UTXO chain, nothing else.
    assert_eq!(harness.btc.broadcasts().len(), 2);
    // The claim spends with the preimage in its scriptSig.
    let claim_raw = hex::decode(harness.btc.broadcasts().last().unwrap()).unwrap();
    let mut needle = vec![0x20u8];
    needle.extend_from_slice(secret.as_bytes());
    assert!(claim_raw.windows(33).any(|w| *w == needle[..]));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.monitor.watched(), 0, "claimed orders are unwatched");
}

// ── S2: expiry refund ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn expiry_without_reveal_refunds() {
    let harness = build_harness("s2", 0);
    harness.btc.add_utxo(WALLET, wallet_utxo(2, 200_000));

    let order = utxo_order(now() + 2);
    let order_hash = order.order_hash;
    harness.handle.submit(order).await.unwrap();

    let ctx = fund_order(&harness, &order_hash).await;
    let cltv_height = ctx.bitcoin.unwrap().cltv_height.unwrap();

    // Wall clock passes expiry but the timelock has not matured: the refund
    // attempt reports NotYetRefundable and the order stays funded.
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    harness.inbox.send(EngineMessage::Tick).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        harness.handle.status(&order_hash).unwrap().status,
        OrderStatus::HtlcFunded
    );

    // Chain tip reaches the CLTV height: refund broadcasts and finalizes.
    harness.btc.set_height(cltv_height);
    harness.inbox.send(EngineMessage::Tick).await.unwrap();
    let ctx = wait_for_status(&harness.handle, &order_hash, OrderStatus::Expired).await;
    let info = ctx.bitcoin.unwrap();
    assert!(info.refund_txid.is_some(), "refund txid must be persisted");

    // Refund nLockTime equals the CLTV height.
    let refund_raw = hex::decode(harness.btc.broadcasts().last().unwrap()).unwrap();
    let locktime = u32::from_le_bytes(refund_raw[refund_raw.len() - 4..].try_into().unwrap());
    assert_eq!(locktime as u64, cltv_height);
}

// ── S3: crash recovery finds the funding output ──────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn restart_discovers_existing_funding_without_rebroadcast() {
    let harness = build_harness("s3", 600);

    // A previous run broadcast the funding tx but crashed before the store
    // learned its txid: the chain already has the HTLC output while the
    // context is still `pending` with no bitcoin record. The wallet is left
    // empty so any re-funding attempt would fail loudly.
    let redeem = htlc_redeem_script(&HtlcScriptParams {
        hashlock: Hashlock::of(&Secret::from_bytes([0xDE; 32])),
        recipient_pubkey: resolver_pubkey(),
        resolver_pubkey: resolver_pubkey(),
        cltv_height: BTC_TIP + 144,
    });
    let htlc_address = p2sh_address(&redeem, BitcoinNetwork::Testnet);
    harness.btc.add_utxo(
        &htlc_address,
        ApiUtxo { txid: TxId::new("cd".repeat(32)), vout: 0, value: 10_000, confirmations: 3 },
    );

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.store.insert(OrderContext::from_new_order(order, now())).unwrap();
    harness
        .inbox
        .send(EngineMessage::ProcessOrder(order_hash))
        .await
        .unwrap();

    let ctx = wait_for_status(&harness.handle, &order_hash, OrderStatus::HtlcCreated).await;
    assert_eq!(
        ctx.bitcoin.as_ref().unwrap().funding_txid.as_ref().unwrap().as_str(),
        "cd".repeat(32)
    );
    assert!(harness.btc.broadcasts().is_empty(), "must not double-spend");

    harness.btc.set_confirmations(&TxId::new("cd".repeat(32)), 3);
    harness.inbox.send(EngineMessage::Tick).await.unwrap();
    wait_for_status(&harness.handle, &order_hash, OrderStatus::HtlcFunded).await;
}

// ── S4: insufficient resolver funds ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn insufficient_source_balance_fails_without_broadcast() {
    let harness = build_harness("s4", 600);

    // Resolver cannot cover the safety deposit on the source chain.
    let evm_address = EvmKey::from_hex(EVM_KEY).unwrap().address();
    harness.evm.set_balance(evm_address, U256::from(1u64));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.handle.submit(order).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let ctx = loop {
        let ctx = harness.handle.status(&order_hash).unwrap();
        if ctx.status == OrderStatus::Failed {
            break ctx;
        }
        assert!(tokio::time::Instant::now() < deadline, "order never failed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let error = ctx.error.unwrap();
    assert!(error.contains("need") && error.contains("have"), "error: {error}");
    assert!(harness.evm.sent().is_empty(), "no source tx may be sent");
    assert!(harness.btc.broadcasts().is_empty(), "no destination tx may be sent");
}

// ── S5: duplicate secret delivery is a no-op ─────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_reveal_delivery_changes_nothing() {
    let harness = build_harness("s5", 600);
    harness.btc.add_utxo(WALLET, wallet_utxo(3, 200_000));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.handle.submit(order).await.unwrap();
    fund_order(&harness, &order_hash).await;

    let secret = Secret::from_bytes([0xDE; 32]);
    let tx_ref = TxRef {
        chain_id: ChainId(11155111),
        tx_hash: TxId::new("0xreveal"),
        block_number: 95,
        log_index: 0,
    };
    for _ in 0..2 {
        harness
            .inbox
            .send(EngineMessage::SecretRevealed {
                order_hash,
                secret: secret.clone(),
                tx_ref: tx_ref.clone(),
            })
            .await
            .unwrap();
    }

    let ctx = wait_for_status(&harness.handle, &order_hash, OrderStatus::Claimed).await;
    // Exactly funding + one claim, despite the double delivery.
    assert_eq!(harness.btc.broadcasts().len(), 2);
    let claiming = ctx.bitcoin.unwrap().claiming_txid.unwrap();

    // A third, late delivery is also a no-op against the terminal state.
    harness
        .inbox
        .send(EngineMessage::SecretRevealed { order_hash, secret, tx_ref })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = harness.handle.status(&order_hash).unwrap();
    assert_eq!(after.status, OrderStatus::Claimed);
    assert_eq!(after.bitcoin.unwrap().claiming_txid.unwrap(), claiming);
}

// ── S6: source-chain reorg after the reveal was emitted ──────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn claim_survives_source_reorg_of_the_reveal() {
    let harness = build_harness("s6", 600);
    harness.btc.add_utxo(WALLET, wallet_utxo(4, 200_000));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.handle.submit(order).await.unwrap();
    fund_order(&harness, &order_hash).await;

    let secret = Secret::from_bytes([0xDE; 32]);
    push_reveal(&harness.evm, &order_hash, &secret, 95, "0xreorged");
    pump_monitor(&harness).await;

    // The reveal is reorged away while the claim is in flight. The preimage
    // is cryptographically valid regardless of the source chain's view, so
    // the destination claim proceeds and accounting stays consistent.
    harness.evm.remove_log(&TxId::new("0xreorged"), 0);
    pump_monitor(&harness).await;

    let ctx = wait_for_status(&harness.handle, &order_hash, OrderStatus::Claimed).await;
    assert!(ctx.bitcoin.unwrap().claiming_txid.is_some());
    assert_eq!(harness.btc.broadcasts().len(), 2, "funding + exactly one claim");

    // No stray re-emission after the reorg.
    pump_monitor(&harness).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.handle.status(&order_hash).unwrap().status, OrderStatus::Claimed);
}

// ── Gateway semantics ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn cancel_only_before_execution() {
    let harness = build_harness("cancel", 600);
    harness.btc.add_utxo(WALLET, wallet_utxo(5, 200_000));

    assert!(matches!(
        harness.handle.cancel(&OrderHash::from_bytes([9; 32])),
        Err(SwapError::OrderNotFound(_))
    ));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.handle.submit(order).await.unwrap();
    wait_for_status(&harness.handle, &order_hash, OrderStatus::HtlcCreated).await;

    // Past pending: refused.
    assert!(matches!(
        harness.handle.cancel(&order_hash),
        Err(SwapError::StateConflict { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_submission_is_idempotent_until_terminal() {
    let harness = build_harness("resubmit", 600);
    harness.btc.add_utxo(WALLET, wallet_utxo(6, 200_000));

    let order = utxo_order(now() + 3_600);
    let order_hash = order.order_hash;
    harness.handle.submit(order.clone()).await.unwrap();

    // In-flight duplicate submission returns the current status.
    match harness.handle.submit(order.clone()).await {
        Ok((hash, _)) => assert_eq!(hash, order_hash),
        Err(SwapError::AlreadyProcessed(hash)) => assert_eq!(hash, order_hash),
        Err(e) => panic!("unexpected error: {e}"),
    }
}
