use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fusionx_core::{ChainId, MonitorConfig, OrderHash, Secret, SwapError, TxRef};
use fusionx_evm::{decode_secret_revealed, secret_revealed_topic, EvmRpc, LogFilter};

/// A stable, deduplicated SecretRevealed observation.
#[derive(Clone, Debug)]
pub struct SecretRevealedEvent {
    pub order_hash: OrderHash,
    pub secret: Secret,
    pub tx_ref: TxRef,
}

type EventKey = (OrderHash, String, u64);

struct MonitorState {
    last_processed: u64,
    watch: HashSet<OrderHash>,
    seen: HashSet<EventKey>,
    /// Recently emitted events and their blocks, re-checked for canonicality
    /// while still inside the reorg window.
    emitted: HashMap<EventKey, u64>,
}

/// Log tailer for one chain.
pub struct EventMonitor {
    rpc: std::sync::Arc<dyn EvmRpc>,
    chain_id: ChainId,
    config: MonitorConfig,
    cursor_path: PathBuf,
    state: Mutex<MonitorState>,
}

impl EventMonitor {
    /// Create a monitor, restoring the persisted cursor when present.
    pub fn new(
        rpc: std::sync::Arc<dyn EvmRpc>,
        chain_id: ChainId,
        config: MonitorConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let cursor_path = data_dir.into().join("monitor-cursors.json");
        let last_processed = Self::load_cursor(&cursor_path, chain_id);
        Self {
            rpc,
            chain_id,
            config,
            cursor_path,
            state: Mutex::new(MonitorState {
                last_processed,
                watch: HashSet::new(),
                seen: HashSet::new(),
                emitted: HashMap::new(),
            }),
        }
    }

    fn load_cursor(path: &PathBuf, chain_id: ChainId) -> u64 {
        let Ok(raw) = std::fs::read_to_string(path) else { return 0 };
        match serde_json::from_str::<HashMap<String, u64>>(&raw) {
            Ok(map) => map.get(&chain_id.0.to_string()).copied().unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "monitor cursor file unreadable; starting from 0");
                0
            }
        }
    }

    fn persist_cursor(&self, value: u64) {
        let mut map: HashMap<String, u64> = std::fs::read_to_string(&self.cursor_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        map.insert(self.chain_id.0.to_string(), value);
        if let Ok(json) = serde_json::to_string_pretty(&map) {
            let tmp = self.cursor_path.with_extension("json.tmp");
            if std::fs::write(&tmp, json).is_ok() {
                let _ = std::fs::rename(&tmp, &self.cursor_path);
            }
        }
    }

    // ── Watch set ────────────────────────────────────────────────────────────

    pub fn watch(&self, order_hash: OrderHash) {
        let mut state = self.state.lock().unwrap();
        if state.watch.insert(order_hash) {
            debug!(order_hash = %order_hash, chain = %self.chain_id, "watching order");
        }
    }

    pub fn unwatch(&self, order_hash: &OrderHash) {
        self.state.lock().unwrap().watch.remove(order_hash);
    }

    pub fn watched(&self) -> usize {
        self.state.lock().unwrap().watch.len()
    }

    // ── Polling ──────────────────────────────────────────────────────────────

    /// One scan pass. Returns fresh events plus the stable height the cursor
    /// may advance to once the batch is acknowledged.
    pub async fn poll_once(&self) -> Result<(Vec<SecretRevealedEvent>, u64), SwapError> {
        let tip = self.rpc.block_number().await?;
        let stable = tip.saturating_sub(self.config.confirmation_depth);

        let (from, watching) = {
            let state = self.state.lock().unwrap();
            (
                state.last_processed.saturating_sub(self.config.reorg_depth),
                !state.watch.is_empty(),
            )
        };
        if !watching || stable == 0 || from > stable {
            return Ok((Vec::new(), stable));
        }

        let logs = self
            .rpc
            .get_logs(&LogFilter {
                from_block: from,
                to_block: stable,
                address: None,
                topic0: Some(secret_revealed_topic()),
            })
            .await?;

        let mut state = self.state.lock().unwrap();

        // Canonicality re-check: anything we emitted inside the rescanned
        // window must still be present, or the cursor rewinds below it.
        let present: HashSet<EventKey> = logs
            .iter()
            .filter_map(|log| {
                decode_secret_revealed(log)
                    .ok()
                    .map(|(order, _)| (order, log.tx_hash.as_str().to_string(), log.log_index))
            })
            .collect();
        let mut rewind_to: Option<u64> = None;
        state.emitted.retain(|key, block| {
            if *block < from || *block > stable {
                return *block > stable; // outside window: keep only future-stable ones
            }
            if !present.contains(key) {
                warn!(order_hash = %key.0, block, "emitted reveal no longer canonical; rewinding");
                let below = block.saturating_sub(1);
                rewind_to = Some(rewind_to.map_or(below, |r: u64| r.min(below)));
                return false;
            }
            true
        });
        if let Some(rewind) = rewind_to {
            let still_emitted: HashSet<EventKey> = state.emitted.keys().cloned().collect();
            state.seen.retain(|key| still_emitted.contains(key) || present.contains(key));
            state.last_processed = state.last_processed.min(rewind);
            self.persist_cursor(state.last_processed);
        }

        let mut events = Vec::new();
        for log in &logs {
            let Ok((order_hash, secret)) = decode_secret_revealed(log) else { continue };
            if !state.watch.contains(&order_hash) {
                continue;
            }
            let key = (order_hash, log.tx_hash.as_str().to_string(), log.log_index);
            if !state.seen.insert(key.clone()) {
                continue;
            }
            state.emitted.insert(key, log.block_number);
            events.push(SecretRevealedEvent {
                order_hash,
                secret,
                tx_ref: TxRef {
                    chain_id: self.chain_id,
                    tx_hash: log.tx_hash.clone(),
                    block_number: log.block_number,
                    log_index: log.log_index,
                },
            });
        }
        Ok((events, stable))
    }

    /// Advance and persist the cursor after the engine received the batch.
    pub fn ack(&self, stable: u64) {
        let mut state = self.state.lock().unwrap();
        if stable > state.last_processed {
            state.last_processed = stable;
            self.persist_cursor(stable);
        }
    }

    pub fn last_processed(&self) -> u64 {
        self.state.lock().unwrap().last_processed
    }

    /// Poll loop: emits events into `events_tx`, acknowledging the scanned
    /// height only after every send landed. Exits when `shutdown` flips.
    pub async fn run(
        self: std::sync::Arc<Self>,
        events_tx: mpsc::Sender<SecretRevealedEvent>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(chain = %self.chain_id, from = self.last_processed(), "event monitor started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok((events, stable)) => {
                            let mut delivered = true;
                            for event in events {
                                if events_tx.send(event).await.is_err() {
                                    delivered = false;
                                    break;
                                }
                            }
                            if delivered {
                                self.ack(stable);
                            }
                        }
                        Err(e) => warn!(chain = %self.chain_id, error = %e, "monitor poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(chain = %self.chain_id, "event monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionx_core::TxId;
    use fusionx_evm::{EvmLog, MockEvmRpc};
    use primitive_types::H160;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fusionx_monitor_{tag}_{}_{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn reveal_log(order_byte: u8, secret_byte: u8, block: u64, tx: &str, index: u64) -> EvmLog {
        let (topics, data) = fusionx_evm::abi::encode_secret_revealed(
            &OrderHash::from_bytes([order_byte; 32]),
            &Secret::from_bytes([secret_byte; 32]),
        );
        EvmLog {
            address: H160::zero(),
            topics,
            data,
            block_number: block,
            tx_hash: TxId::new(tx.to_string()),
            log_index: index,
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig { poll_interval_secs: 1, confirmation_depth: 2, reorg_depth: 6 }
    }

    #[tokio::test]
    async fn emits_watched_reveal_once_stable() {
        let rpc = MockEvmRpc::new(100);
        let dir = temp_dir("stable");
        let monitor = EventMonitor::new(Arc::new(rpc.clone()), ChainId(1), config(), &dir);
        monitor.watch(OrderHash::from_bytes([1; 32]));

        // Above the stable height: not emitted yet.
        rpc.push_log(reveal_log(1, 2, 99, "0xaa", 0));
        let (events, stable) = monitor.poll_once().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(stable, 98);

        // Tip advances past the confirmation depth.
        rpc.set_block_number(101);
        let (events, _) = monitor.poll_once().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].order_hash, OrderHash::from_bytes([1; 32]));
        assert_eq!(events[0].secret, Secret::from_bytes([2; 32]));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unwatched_orders_are_ignored() {
        let rpc = MockEvmRpc::new(100);
        let dir = temp_dir("unwatched");
        let monitor = EventMonitor::new(Arc::new(rpc.clone()), ChainId(1), config(), &dir);
        monitor.watch(OrderHash::from_bytes([9; 32]));

        rpc.push_log(reveal_log(1, 2, 90, "0xaa", 0));
        let (events, _) = monitor.poll_once().await.unwrap();
        assert!(events.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn duplicate_logs_emit_once() {
        let rpc = MockEvmRpc::new(100);
        let dir = temp_dir("dedup");
        let monitor = EventMonitor::new(Arc::new(rpc.clone()), ChainId(1), config(), &dir);
        monitor.watch(OrderHash::from_bytes([1; 32]));
        rpc.push_log(reveal_log(1, 2, 90, "0xaa", 0));

        let (first, stable) = monitor.poll_once().await.unwrap();
        assert_eq!(first.len(), 1);
        monitor.ack(stable);

        // The rescan window still covers block 90: must not re-emit.
        let (second, _) = monitor.poll_once().await.unwrap();
        assert!(second.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cursor_persists_across_restart() {
        let rpc = MockEvmRpc::new(100);
        let dir = temp_dir("cursor");
        {
            let monitor = EventMonitor::new(Arc::new(rpc.clone()), ChainId(1), config(), &dir);
            monitor.watch(OrderHash::from_bytes([1; 32]));
            let (_, stable) = monitor.poll_once().await.unwrap();
            monitor.ack(stable);
            assert_eq!(monitor.last_processed(), 98);
        }
        let monitor = EventMonitor::new(Arc::new(rpc), ChainId(1), config(), &dir);
        assert_eq!(monitor.last_processed(), 98);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reorged_emission_rewinds_cursor() {
        let rpc = MockEvmRpc::new(100);
        let dir = temp_dir("reorg");
        let monitor = EventMonitor::new(Arc::new(rpc.clone()), ChainId(1), config(), &dir);
        monitor.watch(OrderHash::from_bytes([1; 32]));
        rpc.push_log(reveal_log(1, 2, 95, "0xaa", 0));

        let (events, stable) = monitor.poll_once().await.unwrap();
        assert_eq!(events.len(), 1);
        monitor.ack(stable);

        // The reveal disappears from the canonical chain.
        rpc.remove_log(&TxId::new("0xaa"), 0);
        let (events, _) = monitor.poll_once().await.unwrap();
        assert!(events.is_empty());
        assert!(monitor.last_processed() < 95, "cursor must rewind below the lost block");

        // The reveal reappears (mined again) and is emitted exactly once more.
        rpc.push_log(reveal_log(1, 2, 97, "0xbb", 0));
        let (events, _) = monitor.poll_once().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_ref.tx_hash.as_str(), "0xbb");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
