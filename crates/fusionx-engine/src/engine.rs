use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use fusionx_core::{
    ChainKind, NewOrder, NodeConfig, OrderContext, OrderHash, OrderStatus, Secret, SwapError,
    Timestamp, TxRef,
};
use fusionx_store::OrderStore;

use fusionx_bitcoin::HtlcExecutor;
use fusionx_cosmos::CosmosExecutor;
use fusionx_evm::EvmExecutor;
use fusionx_monitor::EventMonitor;

use crate::messages::EngineMessage;
use crate::refund::RefundManager;
use crate::retry::with_backoff;
use crate::validate::validate_order;

use fusionx_core::constants::PENDING_GRACE_SECS;

/// Bound on concurrently processing orders.
const WORKER_PERMITS: usize = 32;

/// Cap on state-machine advances within one worker activation.
const MAX_STEPS_PER_RUN: usize = 8;

/// Delay before re-delivering a message for an order that is mid-step.
const REQUEUE_DELAY_MS: u64 = 100;

/// Everything the engine depends on. Executors only return values; all
/// store mutation happens here.
pub struct EngineDeps {
    pub store: Arc<OrderStore>,
    pub config: NodeConfig,
    pub evm: Option<Arc<EvmExecutor>>,
    pub bitcoin: Option<Arc<HtlcExecutor>>,
    pub cosmos: HashMap<u64, Arc<CosmosExecutor>>,
    pub monitor: Option<Arc<EventMonitor>>,
}

pub struct Engine {
    deps: EngineDeps,
    refunds: RefundManager,
    inbox: mpsc::Sender<EngineMessage>,
    in_flight: Mutex<HashSet<OrderHash>>,
    workers: Arc<Semaphore>,
}

fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}

impl Engine {
    /// Build the engine and hand back the inbox receiver for [`Engine::run`].
    pub fn new(deps: EngineDeps) -> (Arc<Self>, mpsc::Receiver<EngineMessage>) {
        let (tx, rx) = mpsc::channel(512);
        let refunds = RefundManager::new(
            Arc::clone(&deps.store),
            deps.bitcoin.clone(),
            deps.cosmos.clone(),
        );
        let engine = Arc::new(Self {
            deps,
            refunds,
            inbox: tx,
            in_flight: Mutex::new(HashSet::new()),
            workers: Arc::new(Semaphore::new(WORKER_PERMITS)),
        });
        (engine, rx)
    }

    pub fn handle(self: &Arc<Self>) -> EngineHandle {
        EngineHandle { engine: Arc::clone(self) }
    }

    pub fn inbox(&self) -> mpsc::Sender<EngineMessage> {
        self.inbox.clone()
    }

    /// Re-enqueue every non-terminal context and re-arm monitor watches.
    /// Called once on boot, before the inbox starts draining.
    pub fn recover(&self) {
        let in_flight = self.deps.store.get_in_flight();
        if in_flight.is_empty() {
            return;
        }
        info!(count = in_flight.len(), "recovering in-flight orders");
        for ctx in in_flight {
            if ctx.status.is_refundable() {
                if let Some(monitor) = &self.deps.monitor {
                    monitor.watch(ctx.order_hash);
                }
            }
            let _ = self.inbox.try_send(EngineMessage::ProcessOrder(ctx.order_hash));
        }
    }

    /// Main loop: drains the inbox until shutdown, dispatching per-order
    /// workers. Waits (bounded by the semaphore) for in-flight workers on
    /// the way out, then flushes the store.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<EngineMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("execution engine started");
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(EngineMessage::ProcessOrder(order_hash)) => {
                            Arc::clone(&self).dispatch(order_hash, None);
                        }
                        Some(EngineMessage::SecretRevealed { order_hash, secret, tx_ref }) => {
                            Arc::clone(&self).dispatch(order_hash, Some((secret, tx_ref)));
                        }
                        Some(EngineMessage::Tick) => Arc::clone(&self).tick(now_ts()),
                        Some(EngineMessage::Shutdown) | None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() { break; }
                }
            }
        }

        // Drain: once every permit is reacquirable, no worker is mid-step.
        let _ = self.workers.acquire_many(WORKER_PERMITS as u32).await;
        if let Err(e) = self.deps.store.flush() {
            error!(error = %e, "store flush on shutdown failed");
        }
        info!("execution engine stopped");
    }

    /// Spawn a worker for the order unless one is already running; a busy
    /// order gets the message re-delivered shortly after.
    fn dispatch(self: Arc<Self>, order_hash: OrderHash, reveal: Option<(Secret, TxRef)>) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(order_hash) {
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(REQUEUE_DELAY_MS)).await;
                    let message = match reveal {
                        Some((secret, tx_ref)) => {
                            EngineMessage::SecretRevealed { order_hash, secret, tx_ref }
                        }
                        None => EngineMessage::ProcessOrder(order_hash),
                    };
                    let _ = inbox.send(message).await;
                });
                return;
            }
        }

        let engine = self;
        tokio::spawn(async move {
            let permit = engine.workers.clone().acquire_owned().await;
            let step_timeout =
                Duration::from_secs(engine.deps.config.execution.step_timeout_secs.max(1));

            if let Some((secret, tx_ref)) = reveal {
                engine.handle_reveal(order_hash, secret, &tx_ref);
            }
            if tokio::time::timeout(step_timeout, engine.advance(order_hash))
                .await
                .is_err()
            {
                warn!(order_hash = %order_hash, "engine step hit its deadline; will retry");
            }

            engine.in_flight.lock().unwrap().remove(&order_hash);
            drop(permit);
        });
    }

    // ── Reveal handling ──────────────────────────────────────────────────────

    /// Record an observed preimage. Tolerates duplicates and rejects any
    /// candidate that does not hash to the committed hashlock.
    fn handle_reveal(&self, order_hash: OrderHash, secret: Secret, tx_ref: &TxRef) {
        let Some(ctx) = self.deps.store.get(&order_hash) else {
            warn!(order_hash = %order_hash, "reveal for unknown order; ignoring");
            return;
        };
        if ctx.status.is_terminal() || ctx.secret.is_some() {
            debug!(order_hash = %order_hash, "duplicate reveal; no-op");
            return;
        }
        if !secret.verify(&ctx.hashlock) {
            warn!(order_hash = %order_hash, tx = %tx_ref.tx_hash,
                  "revealed preimage does not match hashlock; ignoring");
            return;
        }

        let now = now_ts();
        let result = if ctx.status == OrderStatus::HtlcFunded {
            self.deps.store.record_secret(&order_hash, secret, now).map(|_| ())
        } else {
            // Funding not confirmed yet: stash the verified secret; the
            // confirm step promotes the status once the lock is funded.
            self.deps
                .store
                .update_with(&order_hash, now, |c| c.secret = Some(secret))
                .map(|_| ())
        };
        match result {
            Ok(()) => info!(order_hash = %order_hash, block = tx_ref.block_number,
                            "secret recorded from on-chain reveal"),
            Err(e) => warn!(order_hash = %order_hash, error = %e, "failed to record secret"),
        }
    }

    // ── State machine ────────────────────────────────────────────────────────

    /// Advance one order as far as it will go in this activation.
    async fn advance(&self, order_hash: OrderHash) {
        for _ in 0..MAX_STEPS_PER_RUN {
            let Some(ctx) = self.deps.store.get(&order_hash) else { return };
            if ctx.status.is_terminal() {
                if let Some(monitor) = &self.deps.monitor {
                    monitor.unwatch(&order_hash);
                }
                return;
            }
            let now = now_ts();
            let outcome = match ctx.status {
                OrderStatus::Pending => self.step_pending(&ctx, now).await,
                OrderStatus::HtlcCreated => self.step_confirm(&ctx, now).await,
                OrderStatus::HtlcFunded => self.step_funded(&ctx, now).await,
                OrderStatus::SecretRevealed => self.step_claim(&ctx, now).await,
                _ => Ok(false),
            };
            match outcome {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    self.handle_step_error(&ctx, e, now).await;
                    return;
                }
            }
        }
    }

    fn dst_kind(&self, ctx: &OrderContext) -> Result<ChainKind, SwapError> {
        self.deps
            .config
            .chain_kind(ctx.dst_chain_id)
            .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))
    }

    fn retry_attempts(&self) -> u32 {
        self.deps.config.execution.retry_attempts
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.deps.config.execution.retry_delay_ms)
    }

    /// `pending` → source match + settle, then destination lock.
    async fn step_pending(&self, ctx: &OrderContext, now: Timestamp) -> Result<bool, SwapError> {
        if ctx.is_expired(now) {
            self.mark_failed(ctx, "expired before execution started", now);
            return Ok(false);
        }

        if let Some(evm) = &self.deps.evm {
            if ctx.match_txid.is_none() {
                let matched = with_backoff("match_order", self.retry_attempts(), self.retry_delay(), || {
                    evm.match_order(ctx)
                })
                .await?;
                if let Some(txid) = matched {
                    self.deps
                        .store
                        .update_with(&ctx.order_hash, now, |c| c.match_txid = Some(txid.clone()))?;
                }
            }
            if ctx.settle_txid.is_none() {
                let txid =
                    with_backoff("settle", self.retry_attempts(), self.retry_delay(), || {
                        evm.settle(ctx)
                    })
                    .await?;
                self.deps
                    .store
                    .update_with(&ctx.order_hash, now, |c| c.settle_txid = Some(txid.clone()))?;
            }
        }

        match self.dst_kind(ctx)? {
            ChainKind::Bitcoin => {
                let executor = self
                    .deps
                    .bitcoin
                    .as_ref()
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let creation =
                    with_backoff("create_and_fund", self.retry_attempts(), self.retry_delay(), || {
                        executor.create_and_fund(ctx)
                    })
                    .await?;
                self.deps.store.update_bitcoin_info(&ctx.order_hash, now, |info| {
                    info.htlc_address = Some(creation.htlc_address.clone());
                    info.htlc_script = Some(hex::encode(&creation.redeem_script));
                    info.cltv_height = Some(creation.cltv_height);
                    info.funding_txid = Some(creation.funding_txid.clone());
                    info.funding_amount = Some(creation.funding_amount);
                })?;
            }
            ChainKind::Cosmos => {
                let executor = self
                    .deps
                    .cosmos
                    .get(&ctx.dst_chain_id.0)
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let txid = with_backoff(
                    "execute_fusion_order",
                    self.retry_attempts(),
                    self.retry_delay(),
                    || executor.execute_fusion_order(ctx, now),
                )
                .await?;
                if let Some(txid) = txid {
                    self.deps
                        .store
                        .update_with(&ctx.order_hash, now, |c| c.dst_txid = Some(txid.clone()))?;
                }
            }
            ChainKind::Evm => {
                return Err(SwapError::MalformedOrder {
                    field: "dst_chain_id",
                    reason: "EVM destinations are not supported".into(),
                });
            }
        }

        self.deps.store.update_status(&ctx.order_hash, OrderStatus::HtlcCreated, now)?;
        Ok(true)
    }

    /// `htlc_created` → wait for the destination lock to be spendable.
    async fn step_confirm(&self, ctx: &OrderContext, now: Timestamp) -> Result<bool, SwapError> {
        match self.dst_kind(ctx)? {
            ChainKind::Bitcoin => {
                let executor = self
                    .deps
                    .bitcoin
                    .as_ref()
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let min_confirmations = self
                    .deps
                    .config
                    .bitcoin
                    .as_ref()
                    .map(|b| b.min_confirmations)
                    .unwrap_or(1);

                let confirmations = executor.funding_confirmations(ctx).await?;
                if confirmations >= min_confirmations {
                    self.deps
                        .store
                        .update_status(&ctx.order_hash, OrderStatus::HtlcFunded, now)?;
                    return Ok(true);
                }
                // A vanished funding tx means a reorg ate it: reset the
                // watcher state and fund again from the same script/address.
                if executor.funding_missing(ctx).await? {
                    warn!(order_hash = %ctx.order_hash,
                          "funding tx no longer canonical; re-funding HTLC");
                    let refreshed = self.deps.store.update_bitcoin_info(&ctx.order_hash, now, |info| {
                        info.funding_txid = None;
                        info.funding_amount = None;
                    })?;
                    let creation = with_backoff(
                        "re-fund",
                        self.retry_attempts(),
                        self.retry_delay(),
                        || executor.create_and_fund(&refreshed),
                    )
                    .await?;
                    self.deps.store.update_bitcoin_info(&ctx.order_hash, now, |info| {
                        info.funding_txid = Some(creation.funding_txid.clone());
                        info.funding_amount = Some(creation.funding_amount);
                    })?;
                }
                Ok(false)
            }
            ChainKind::Cosmos => {
                let executor = self
                    .deps
                    .cosmos
                    .get(&ctx.dst_chain_id.0)
                    .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                let contract = match &ctx.dst_params {
                    fusionx_core::DstParams::Cosmos { contract, .. } => contract.clone(),
                    _ => String::new(),
                };
                if contract.is_empty()
                    || executor.query_order(&contract, ctx).await?.is_some()
                {
                    self.deps
                        .store
                        .update_status(&ctx.order_hash, OrderStatus::HtlcFunded, now)?;
                    return Ok(true);
                }
                Ok(false)
            }
            ChainKind::Evm => Ok(false),
        }
    }

    /// `htlc_funded` → watch for the reveal; route to refund past expiry.
    async fn step_funded(&self, ctx: &OrderContext, now: Timestamp) -> Result<bool, SwapError> {
        if ctx.secret.is_some() {
            // Reveal arrived while funding was still confirming.
            self.deps
                .store
                .update_status(&ctx.order_hash, OrderStatus::SecretRevealed, now)?;
            return Ok(true);
        }
        if ctx.is_expired(now) {
            let kind = self.dst_kind(ctx)?;
            self.refunds.refund(ctx, kind, now).await?;
            return Ok(false);
        }
        if let Some(monitor) = &self.deps.monitor {
            monitor.watch(ctx.order_hash);
        }
        Ok(false)
    }

    /// `secret_revealed` → counter-claim destination, complete source.
    async fn step_claim(&self, ctx: &OrderContext, now: Timestamp) -> Result<bool, SwapError> {
        let secret = ctx
            .secret
            .clone()
            .ok_or_else(|| SwapError::Other("secret_revealed context without secret".into()))?;

        match self.dst_kind(ctx)? {
            ChainKind::Bitcoin => {
                let already_claimed =
                    ctx.bitcoin.as_ref().and_then(|b| b.claiming_txid.as_ref()).is_some();
                if !already_claimed {
                    let executor = self
                        .deps
                        .bitcoin
                        .as_ref()
                        .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                    let txid =
                        with_backoff("claim", self.retry_attempts(), self.retry_delay(), || {
                            executor.claim(ctx, &secret)
                        })
                        .await?;
                    self.deps.store.update_bitcoin_info(&ctx.order_hash, now, |info| {
                        info.claiming_txid = Some(txid.clone());
                    })?;
                }
            }
            ChainKind::Cosmos => {
                if ctx.claim_txid.is_none() {
                    let executor = self
                        .deps
                        .cosmos
                        .get(&ctx.dst_chain_id.0)
                        .ok_or(SwapError::UnknownChain(ctx.dst_chain_id))?;
                    let txid = with_backoff(
                        "claim_fusion_order",
                        self.retry_attempts(),
                        self.retry_delay(),
                        || executor.claim_fusion_order(ctx, &secret),
                    )
                    .await?;
                    self.deps
                        .store
                        .update_with(&ctx.order_hash, now, |c| c.claim_txid = Some(txid.clone()))?;
                }
            }
            ChainKind::Evm => return Err(SwapError::UnknownChain(ctx.dst_chain_id)),
        }

        if let Some(evm) = &self.deps.evm {
            if ctx.complete_txid.is_none() {
                let txid = with_backoff(
                    "complete_order",
                    self.retry_attempts(),
                    self.retry_delay(),
                    || evm.complete_order(&ctx.order_hash, &secret),
                )
                .await?;
                self.deps
                    .store
                    .update_with(&ctx.order_hash, now, |c| c.complete_txid = Some(txid.clone()))?;
            }
        }

        self.deps.store.update_status(&ctx.order_hash, OrderStatus::Claimed, now)?;
        if let Some(monitor) = &self.deps.monitor {
            monitor.unwatch(&ctx.order_hash);
        }
        info!(order_hash = %ctx.order_hash, "swap complete");
        Ok(false)
    }

    async fn handle_step_error(&self, ctx: &OrderContext, err: SwapError, now: Timestamp) {
        use fusionx_core::ErrorClass::*;
        match err.class() {
            AlreadyDone => {
                debug!(order_hash = %ctx.order_hash, error = %err, "effect already on-chain");
            }
            Transient => {
                warn!(order_hash = %ctx.order_hash, status = ?ctx.status, error = %err,
                      "step failed transiently; ticker will retry");
                let _ = self.deps.store.update_with(&ctx.order_hash, now, |c| {
                    c.error = Some(err.to_string());
                });
            }
            Validation | Permanent => {
                if matches!(ctx.status, OrderStatus::Pending | OrderStatus::HtlcCreated) {
                    self.mark_failed(ctx, &err.to_string(), now);
                } else {
                    // Funds are locked: never a terminal `failed` here. Record
                    // the error and drive the refund path once expiry allows.
                    error!(order_hash = %ctx.order_hash, status = ?ctx.status, error = %err,
                           "permanent failure after funding; relying on refund path");
                    let _ = self.deps.store.update_with(&ctx.order_hash, now, |c| {
                        c.error = Some(err.to_string());
                    });
                    if ctx.is_expired(now) {
                        if let Ok(kind) = self.dst_kind(ctx) {
                            if let Err(e) = self.refunds.refund(ctx, kind, now).await {
                                warn!(order_hash = %ctx.order_hash, error = %e, "refund attempt failed");
                            }
                        }
                    }
                }
            }
        }
    }

    fn mark_failed(&self, ctx: &OrderContext, reason: &str, now: Timestamp) {
        error!(order_hash = %ctx.order_hash, reason, "order failed");
        let _ = self.deps.store.update_with(&ctx.order_hash, now, |c| {
            c.error = Some(reason.to_string());
        });
        let _ = self.deps.store.update_status(&ctx.order_hash, OrderStatus::Failed, now);
        if let Some(monitor) = &self.deps.monitor {
            monitor.unwatch(&ctx.order_hash);
        }
    }

    // ── Ticker ───────────────────────────────────────────────────────────────

    /// Expiry / staleness sweep: re-enqueue everything actionable.
    fn tick(self: Arc<Self>, now: Timestamp) {
        for ctx in self.deps.store.get_in_flight() {
            let actionable = match ctx.status {
                OrderStatus::Pending => now - ctx.updated_at > PENDING_GRACE_SECS,
                OrderStatus::HtlcCreated => true,
                OrderStatus::HtlcFunded => ctx.is_expired(now) || ctx.secret.is_some(),
                OrderStatus::SecretRevealed => true,
                _ => false,
            };
            if actionable {
                Arc::clone(&self).dispatch(ctx.order_hash, None);
            }
        }
    }

    /// Periodic Tick feeder; runs until shutdown.
    pub async fn run_ticker(
        inbox: mpsc::Sender<EngineMessage>,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if inbox.send(EngineMessage::Tick).await.is_err() {
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() { return; }
                }
            }
        }
    }

    /// Forward monitor events into the inbox; runs until the monitor closes.
    pub async fn run_event_forwarder(
        inbox: mpsc::Sender<EngineMessage>,
        mut events: mpsc::Receiver<fusionx_monitor::SecretRevealedEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let message = EngineMessage::SecretRevealed {
                order_hash: event.order_hash,
                secret: event.secret,
                tx_ref: event.tx_ref,
            };
            if inbox.send(message).await.is_err() {
                return;
            }
        }
    }
}

// ── Gateway-facing handle ────────────────────────────────────────────────────

/// Narrow API the external gateway calls. Thin: validation, a durable write,
/// and an inbox send; every decision beyond that belongs to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
}

impl EngineHandle {
    /// Enqueue a new order. Returns after the context is durable.
    pub async fn submit(&self, order: NewOrder) -> Result<(OrderHash, OrderStatus), SwapError> {
        let now = now_ts();
        validate_order(&order, &self.engine.deps.config, now)?;

        let order_hash = order.order_hash;
        if let Some(existing) = self.engine.deps.store.get(&order_hash) {
            if existing.status.is_terminal() {
                return Err(SwapError::AlreadyProcessed(order_hash));
            }
            // Duplicate submission of an in-flight order is idempotent.
            return Ok((order_hash, existing.status));
        }

        let ctx = OrderContext::from_new_order(order, now);
        self.engine.deps.store.insert(ctx)?;
        self.engine
            .inbox
            .send(EngineMessage::ProcessOrder(order_hash))
            .await
            .map_err(|_| SwapError::Other("engine inbox closed".into()))?;
        info!(order_hash = %order_hash, "order accepted");
        Ok((order_hash, OrderStatus::Pending))
    }

    pub fn status(&self, order_hash: &OrderHash) -> Option<OrderContext> {
        self.engine.deps.store.get(order_hash)
    }

    /// Cancel is only honored before any chain action: strictly `pending`.
    pub fn cancel(&self, order_hash: &OrderHash) -> Result<(), SwapError> {
        let ctx = self
            .engine
            .deps
            .store
            .get(order_hash)
            .ok_or(SwapError::OrderNotFound(*order_hash))?;
        if ctx.status != OrderStatus::Pending {
            return Err(SwapError::StateConflict { order_hash: *order_hash, status: ctx.status });
        }
        let now = now_ts();
        self.engine.deps.store.update_with(order_hash, now, |c| {
            c.error = Some("cancelled by operator".into());
        })?;
        self.engine.deps.store.update_status(order_hash, OrderStatus::Failed, now)?;
        info!(order_hash = %order_hash, "order cancelled");
        Ok(())
    }

    pub fn pending(&self) -> Vec<OrderContext> {
        self.engine.deps.store.get_pending()
    }

    pub fn list(&self, status: Option<OrderStatus>, limit: usize) -> Vec<OrderContext> {
        let mut orders = match status {
            Some(s) => self.engine.deps.store.get_by_status(s),
            None => {
                let mut all = self.engine.deps.store.get_in_flight();
                for s in [OrderStatus::Claimed, OrderStatus::Expired, OrderStatus::Failed] {
                    all.extend(self.engine.deps.store.get_by_status(s));
                }
                all
            }
        };
        orders.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        orders.truncate(limit);
        orders
    }
}
