use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fusionx_core::constants::{STORE_FORMAT_VERSION, STORE_RETENTION_SECS};
use fusionx_core::{BitcoinSwapInfo, OrderContext, OrderHash, OrderStatus, Secret, SwapError, Timestamp};

/// On-disk layout of `order-contexts.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    pub saved_at: Timestamp,
    pub contexts: HashMap<String, OrderContext>,
}

/// In-memory map of order contexts with file-backed durability.
///
/// All mutation goes through methods that take `&self`; the map lives behind
/// a mutex and the file is only ever replaced whole via temp + rename, so a
/// reader of the file always sees a complete, parseable snapshot.
pub struct OrderStore {
    path: PathBuf,
    contexts: Mutex<HashMap<OrderHash, OrderContext>>,
    dirty: AtomicBool,
}

impl OrderStore {
    /// Load the store from `dir/order-contexts.json`, starting empty (with a
    /// loud log line) if the file is missing or unparseable.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SwapError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| SwapError::Store(e.to_string()))?;
        let path = dir.join("order-contexts.json");

        let mut contexts = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoreFile>(&raw) {
                Ok(file) => {
                    for (_, ctx) in file.contexts {
                        contexts.insert(ctx.order_hash, ctx);
                    }
                    info!(count = contexts.len(), path = %path.display(), "loaded order contexts");
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "order context file is corrupt; starting with an empty store"
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no existing order context file");
            }
            Err(e) => return Err(SwapError::Store(e.to_string())),
        }

        let store = Self {
            path,
            contexts: Mutex::new(contexts),
            dirty: AtomicBool::new(false),
        };
        store.gc(chrono::Utc::now().timestamp());
        Ok(store)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, order_hash: &OrderHash) -> Option<OrderContext> {
        self.contexts.lock().unwrap().get(order_hash).cloned()
    }

    pub fn has(&self, order_hash: &OrderHash) -> bool {
        self.contexts.lock().unwrap().contains_key(order_hash)
    }

    pub fn get_by_status(&self, status: OrderStatus) -> Vec<OrderContext> {
        self.contexts
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect()
    }

    pub fn get_pending(&self) -> Vec<OrderContext> {
        self.get_by_status(OrderStatus::Pending)
    }

    /// Every context that has not reached a terminal state. Used by crash
    /// recovery and the expiry ticker.
    pub fn get_in_flight(&self) -> Vec<OrderContext> {
        self.contexts
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Insert a fresh context and flush immediately: `Submit` must not return
    /// before the order is durable.
    pub fn insert(&self, ctx: OrderContext) -> Result<(), SwapError> {
        {
            let mut map = self.contexts.lock().unwrap();
            if let Some(existing) = map.get(&ctx.order_hash) {
                if existing.status.is_terminal() {
                    return Err(SwapError::AlreadyProcessed(ctx.order_hash));
                }
                return Err(SwapError::StateConflict {
                    order_hash: ctx.order_hash,
                    status: existing.status,
                });
            }
            map.insert(ctx.order_hash, ctx);
        }
        self.flush()
    }

    /// Advance the status through the state machine. Transitions into
    /// counter-party-enabling states flush synchronously; everything else is
    /// picked up by the debounce flusher.
    pub fn update_status(
        &self,
        order_hash: &OrderHash,
        next: OrderStatus,
        now: Timestamp,
    ) -> Result<OrderContext, SwapError> {
        let (ctx, critical) = {
            let mut map = self.contexts.lock().unwrap();
            let ctx = map
                .get_mut(order_hash)
                .ok_or(SwapError::OrderNotFound(*order_hash))?;
            ctx.transition_to(next, now)?;
            let critical =
                matches!(next, OrderStatus::HtlcFunded | OrderStatus::SecretRevealed);
            (ctx.clone(), critical)
        };
        debug!(order_hash = %order_hash, status = ?next, "status updated");
        if critical {
            self.flush()?;
        } else {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(ctx)
    }

    /// Record the verified preimage alongside the `secret_revealed`
    /// transition, as one durable write.
    pub fn record_secret(
        &self,
        order_hash: &OrderHash,
        secret: Secret,
        now: Timestamp,
    ) -> Result<OrderContext, SwapError> {
        let ctx = {
            let mut map = self.contexts.lock().unwrap();
            let ctx = map
                .get_mut(order_hash)
                .ok_or(SwapError::OrderNotFound(*order_hash))?;
            ctx.set_secret(secret, now)?;
            ctx.transition_to(OrderStatus::SecretRevealed, now)?;
            ctx.clone()
        };
        self.flush()?;
        Ok(ctx)
    }

    /// Merge UTXO-side facts into the context's bitcoin sub-record.
    pub fn update_bitcoin_info<F>(
        &self,
        order_hash: &OrderHash,
        now: Timestamp,
        apply: F,
    ) -> Result<OrderContext, SwapError>
    where
        F: FnOnce(&mut BitcoinSwapInfo),
    {
        let ctx = {
            let mut map = self.contexts.lock().unwrap();
            let ctx = map
                .get_mut(order_hash)
                .ok_or(SwapError::OrderNotFound(*order_hash))?;
            apply(ctx.bitcoin_mut());
            ctx.updated_at = now;
            ctx.clone()
        };
        self.dirty.store(true, Ordering::Release);
        Ok(ctx)
    }

    /// Arbitrary field update under the store lock (error message, chain tx
    /// ids). Status changes must go through `update_status` instead.
    pub fn update_with<F>(
        &self,
        order_hash: &OrderHash,
        now: Timestamp,
        apply: F,
    ) -> Result<OrderContext, SwapError>
    where
        F: FnOnce(&mut OrderContext),
    {
        let ctx = {
            let mut map = self.contexts.lock().unwrap();
            let ctx = map
                .get_mut(order_hash)
                .ok_or(SwapError::OrderNotFound(*order_hash))?;
            apply(ctx);
            ctx.updated_at = now;
            ctx.clone()
        };
        self.dirty.store(true, Ordering::Release);
        Ok(ctx)
    }

    pub fn delete(&self, order_hash: &OrderHash) -> bool {
        let removed = self.contexts.lock().unwrap().remove(order_hash).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn clear(&self) -> Result<(), SwapError> {
        self.contexts.lock().unwrap().clear();
        self.flush()
    }

    /// Drop terminal contexts older than the retention window.
    pub fn gc(&self, now: Timestamp) -> usize {
        let mut map = self.contexts.lock().unwrap();
        let before = map.len();
        map.retain(|_, c| !(c.status.is_terminal() && now - c.updated_at > STORE_RETENTION_SECS));
        let dropped = before - map.len();
        if dropped > 0 {
            self.dirty.store(true, Ordering::Release);
            info!(dropped, "garbage-collected terminal order contexts");
        }
        dropped
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Serialize the whole map and atomically replace the file. Returns only
    /// after the rename has happened.
    pub fn flush(&self) -> Result<(), SwapError> {
        let file = {
            let map = self.contexts.lock().unwrap();
            StoreFile {
                version: STORE_FORMAT_VERSION,
                saved_at: chrono::Utc::now().timestamp(),
                contexts: map
                    .iter()
                    .map(|(k, v)| (k.to_hex(), v.clone()))
                    .collect(),
            }
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SwapError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| SwapError::Store(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| SwapError::Store(e.to_string()))?;

        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Flush only if something changed since the last write.
    pub fn flush_if_dirty(&self) -> Result<bool, SwapError> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Background debounce flusher. Ticks every `debounce` and writes the file
/// when dirty; exits after a final flush once `shutdown` resolves.
pub async fn run_flusher(
    store: std::sync::Arc<OrderStore>,
    debounce: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(debounce);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = store.flush_if_dirty() {
                    warn!(error = %e, "debounced store flush failed");
                }
                store.gc(chrono::Utc::now().timestamp());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    if let Err(e) = store.flush() {
                        error!(error = %e, "final store flush failed");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionx_core::{ChainId, DstParams, Hashlock, NewOrder};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fusionx_store_{tag}_{}_{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn make_order(byte: u8) -> NewOrder {
        NewOrder {
            order_hash: OrderHash::from_bytes([byte; 32]),
            src_chain_id: ChainId(11155111),
            dst_chain_id: ChainId(40004),
            maker: "0xmaker".into(),
            src_token: "0xtoken".into(),
            dst_token: "BTC".into(),
            src_amount: 1_000,
            dst_amount: 10_000,
            hashlock: Hashlock::of(&Secret::from_bytes([byte; 32])),
            expiry_time: 9_999_999_999,
            dst_params: DstParams::Utxo {
                recipient_pubkey: "02".repeat(33),
                timelock_blocks: 144,
                fee_rate: None,
            },
        }
    }

    fn make_ctx(byte: u8) -> OrderContext {
        OrderContext::from_new_order(make_order(byte), 1_000)
    }

    #[test]
    fn insert_then_reopen_preserves_order() {
        let dir = temp_dir("reopen");
        {
            let store = OrderStore::open(&dir).unwrap();
            store.insert(make_ctx(1)).unwrap();
        }
        let store = OrderStore::open(&dir).unwrap();
        let ctx = store.get(&OrderHash::from_bytes([1; 32])).unwrap();
        assert_eq!(ctx.status, OrderStatus::Pending);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_insert_refused() {
        let dir = temp_dir("dup");
        let store = OrderStore::open(&dir).unwrap();
        store.insert(make_ctx(2)).unwrap();
        assert!(matches!(
            store.insert(make_ctx(2)),
            Err(SwapError::StateConflict { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn terminal_duplicate_reports_already_processed() {
        let dir = temp_dir("dup_terminal");
        let store = OrderStore::open(&dir).unwrap();
        let mut ctx = make_ctx(3);
        ctx.status = OrderStatus::Failed;
        store.insert(ctx).unwrap();
        assert!(matches!(
            store.insert(make_ctx(3)),
            Err(SwapError::AlreadyProcessed(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_status_enforces_state_machine() {
        let dir = temp_dir("transitions");
        let store = OrderStore::open(&dir).unwrap();
        let hash = OrderHash::from_bytes([4; 32]);
        store.insert(make_ctx(4)).unwrap();

        store.update_status(&hash, OrderStatus::HtlcCreated, 1_001).unwrap();
        assert!(store
            .update_status(&hash, OrderStatus::Claimed, 1_002)
            .is_err());
        store.update_status(&hash, OrderStatus::HtlcFunded, 1_003).unwrap();
        assert_eq!(store.get(&hash).unwrap().status, OrderStatus::HtlcFunded);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn critical_transition_is_durable_without_explicit_flush() {
        let dir = temp_dir("critical");
        let store = OrderStore::open(&dir).unwrap();
        let hash = OrderHash::from_bytes([5; 32]);
        store.insert(make_ctx(5)).unwrap();
        store.update_status(&hash, OrderStatus::HtlcCreated, 1_001).unwrap();
        store.update_status(&hash, OrderStatus::HtlcFunded, 1_002).unwrap();

        // A second handle reading the file directly must already see it.
        let raw = std::fs::read_to_string(dir.join("order-contexts.json")).unwrap();
        let file: StoreFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            file.contexts.get(&hash.to_hex()).unwrap().status,
            OrderStatus::HtlcFunded
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn record_secret_rejects_bad_preimage() {
        let dir = temp_dir("secret");
        let store = OrderStore::open(&dir).unwrap();
        let hash = OrderHash::from_bytes([6; 32]);
        store.insert(make_ctx(6)).unwrap();
        store.update_status(&hash, OrderStatus::HtlcCreated, 1_001).unwrap();
        store.update_status(&hash, OrderStatus::HtlcFunded, 1_002).unwrap();

        let err = store
            .record_secret(&hash, Secret::from_bytes([0xFF; 32]), 1_003)
            .unwrap_err();
        assert!(matches!(err, SwapError::PreimageMismatch { .. }));

        store
            .record_secret(&hash, Secret::from_bytes([6; 32]), 1_004)
            .unwrap();
        let ctx = store.get(&hash).unwrap();
        assert_eq!(ctx.status, OrderStatus::SecretRevealed);
        assert!(ctx.secret.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("order-contexts.json"), "{not json").unwrap();
        let store = OrderStore::open(&dir).unwrap();
        assert!(store.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn gc_drops_only_old_terminal_entries() {
        let dir = temp_dir("gc");
        let store = OrderStore::open(&dir).unwrap();

        let mut old_done = make_ctx(7);
        old_done.status = OrderStatus::Claimed;
        old_done.updated_at = 0;
        store.insert(old_done).unwrap();

        let mut live = make_ctx(8);
        live.status = OrderStatus::HtlcFunded;
        live.updated_at = 0;
        store.insert(live).unwrap();

        let dropped = store.gc(STORE_RETENTION_SECS + 100);
        assert_eq!(dropped, 1);
        assert!(!store.has(&OrderHash::from_bytes([7; 32])));
        assert!(store.has(&OrderHash::from_bytes([8; 32])));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn flush_if_dirty_skips_clean_store() {
        let dir = temp_dir("dirty");
        let store = OrderStore::open(&dir).unwrap();
        store.insert(make_ctx(9)).unwrap(); // insert flushes
        assert!(!store.flush_if_dirty().unwrap());
        store
            .update_with(&OrderHash::from_bytes([9; 32]), 1_001, |c| {
                c.error = Some("probe".into())
            })
            .unwrap();
        assert!(store.flush_if_dirty().unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn in_flight_excludes_terminal() {
        let dir = temp_dir("inflight");
        let store = OrderStore::open(&dir).unwrap();
        store.insert(make_ctx(10)).unwrap();
        let mut done = make_ctx(11);
        done.status = OrderStatus::Claimed;
        store.insert(done).unwrap();
        let in_flight = store.get_in_flight();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].order_hash, OrderHash::from_bytes([10; 32]));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
