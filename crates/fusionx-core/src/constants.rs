//! ─── FusionX Protocol Constants ─────────────────────────────────────────────
//!
//! Defaults for the swap coordinator. Everything here can be overridden from
//! the node config; these are the values used when a field is absent.

// ── UTXO / HTLC ──────────────────────────────────────────────────────────────

/// Default CLTV delta in blocks for destination HTLCs (~24h on BTC-class chains).
pub const DEFAULT_HTLC_TIMELOCK_BLOCKS: u32 = 144;

/// Floor for the per-order timelock delta. Orders below this are refused
/// outright: the reveal/claim race needs at least a day of slack.
pub const MIN_TIMELOCK_BLOCKS: u32 = 144;

/// Change below this many sats is absorbed into the fee.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Fallback fee rate (sat/vB) when the cache is empty and the API gives none.
pub const DEFAULT_FEE_RATE_SAT_VB: u64 = 10;

/// Confirmations before a funding output counts as funded.
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 1;

/// Cached fee-rate entries older than this are refreshed.
pub const FEE_RATE_TTL_SECS: i64 = 60;

/// Discovered UTXOs older than this are dropped from the cache and
/// re-fetched on next use.
pub const UTXO_CACHE_TTL_SECS: i64 = 300;

// ── Engine ───────────────────────────────────────────────────────────────────

/// Base delay for the exponential backoff (doubles per attempt).
pub const RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Default cap on transient-error retries per step.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Deadline for a single engine step (chain calls included).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

/// Orders must expire at least this far in the future at submission.
pub const DEFAULT_MIN_EXPIRY_LEAD_SECS: i64 = 600;

/// A `pending` order older than this is re-processed by the ticker.
pub const PENDING_GRACE_SECS: i64 = 30;

/// Expiry-check ticker interval.
pub const TICK_INTERVAL_SECS: u64 = 10;

// ── Store ────────────────────────────────────────────────────────────────────

/// Debounce window for coalesced store writes.
pub const STORE_DEBOUNCE_MS: u64 = 1_000;

/// Terminal contexts older than this are garbage-collected.
pub const STORE_RETENTION_SECS: i64 = 7 * 24 * 3600;

/// On-disk format version of the order-context file.
pub const STORE_FORMAT_VERSION: u32 = 1;

// ── Monitor ──────────────────────────────────────────────────────────────────

/// Poll interval for log tailing.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Blocks below tip considered stable enough to act on.
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 2;

/// Blocks re-scanned behind the cursor to survive reorgs.
pub const DEFAULT_REORG_DEPTH: u64 = 6;

// ── Account-model ────────────────────────────────────────────────────────────

/// Safety deposit in basis points of the order amount.
pub const DEFAULT_SAFETY_DEPOSIT_BPS: u16 = 500;

/// Gas ceiling fallback when simulation fails.
pub const DEFAULT_COSMOS_GAS_CEILING: u64 = 900_000;

/// Multiplier applied to simulated gas, in percent.
pub const GAS_ADJUSTMENT_PCT: u64 = 130;

// ── EVM ──────────────────────────────────────────────────────────────────────

/// Gas ceiling fallback when `eth_estimateGas` fails.
pub const DEFAULT_EVM_GAS_CEILING: u64 = 500_000;
