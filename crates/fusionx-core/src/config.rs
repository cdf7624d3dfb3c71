//! Node configuration.
//!
//! Deserialized from a single JSON file; every field has a serde default so a
//! minimal config (keys + endpoints) is enough to run. The chain allow-list
//! is derived from what is configured: an order naming a chain id with no
//! matching section is refused at intake.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::*;
use crate::types::{ChainId, ChainKind};

// ── Bitcoin ──────────────────────────────────────────────────────────────────

/// Which Bitcoin-class network the UTXO executor talks to. Selects the P2SH
/// address version byte and the default Esplora API base URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    #[default]
    Testnet,
}

impl BitcoinNetwork {
    /// Base58Check version byte for P2SH addresses.
    pub fn p2sh_version(&self) -> u8 {
        match self {
            BitcoinNetwork::Mainnet => 0x05,
            BitcoinNetwork::Testnet => 0xC4,
        }
    }

    /// Base58Check version byte for P2PKH addresses.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            BitcoinNetwork::Mainnet => 0x00,
            BitcoinNetwork::Testnet => 0x6F,
        }
    }

    pub fn default_api_url(&self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "https://blockstream.info/api",
            BitcoinNetwork::Testnet => "https://blockstream.info/testnet/api",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinConfig {
    /// Protocol-assigned chain id for this UTXO destination.
    pub chain_id: ChainId,
    pub network: BitcoinNetwork,
    /// Esplora-style REST endpoint; `None` uses the network default.
    pub api_url: Option<String>,
    /// Default fee rate (sat/vB) when the cache is empty.
    pub fee_rate: u64,
    /// Default CLTV delta in blocks.
    pub htlc_timelock: u32,
    /// Per-order timelock floor; orders below are refused.
    pub min_timelock: u32,
    pub min_confirmations: u64,
    pub dust_threshold: u64,
    /// Hex-encoded 32-byte secp256k1 resolver key.
    pub key_hex: String,
    /// Resolver change/refund address.
    pub change_address: String,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            chain_id: ChainId(40004),
            network: BitcoinNetwork::Testnet,
            api_url: None,
            fee_rate: DEFAULT_FEE_RATE_SAT_VB,
            htlc_timelock: DEFAULT_HTLC_TIMELOCK_BLOCKS,
            min_timelock: MIN_TIMELOCK_BLOCKS,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            key_hex: String::new(),
            change_address: String::new(),
        }
    }
}

// ── EVM ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmConfig {
    pub chain_id: ChainId,
    pub rpc_url: String,
    /// Fusion factory contract (source escrows).
    pub factory: String,
    /// Registry contract for safety-deposit quotes.
    pub registry: String,
    /// Hex-encoded 32-byte secp256k1 resolver key.
    pub key_hex: String,
    pub gas_ceiling: u64,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            chain_id: ChainId(11155111),
            rpc_url: String::new(),
            factory: String::new(),
            registry: String::new(),
            key_hex: String::new(),
            gas_ceiling: DEFAULT_EVM_GAS_CEILING,
        }
    }
}

// ── Cosmos ───────────────────────────────────────────────────────────────────

/// One account-model destination network, keyed by chain id in the config map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmosNetwork {
    pub rpc_url: String,
    /// Bech32 address prefix (e.g. "neutron").
    pub prefix: String,
    pub denom: String,
    /// Gas price in `denom` per gas unit, as a decimal string.
    pub gas_price: String,
    pub gas_ceiling: u64,
    /// Fusion contract address; empty means no contract support.
    pub contract: String,
    pub safety_deposit_bps: u16,
    /// Resolver fee attached to each execute, in base units.
    pub resolver_fee: u128,
    /// Plain value transfers are non-atomic; refused unless opted in.
    pub allow_native_fallback: bool,
}

impl Default for CosmosNetwork {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            prefix: String::new(),
            denom: String::new(),
            gas_price: "0.025".into(),
            gas_ceiling: DEFAULT_COSMOS_GAS_CEILING,
            contract: String::new(),
            safety_deposit_bps: DEFAULT_SAFETY_DEPOSIT_BPS,
            resolver_fee: 0,
            allow_native_fallback: false,
        }
    }
}

// ── Engine / monitor ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub step_timeout_secs: u64,
    /// Deadline hint passed into the destination contract.
    pub timeout_seconds: u64,
    pub min_expiry_lead_secs: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: RETRY_BASE_DELAY_MS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            timeout_seconds: 3_600,
            min_expiry_lead_secs: DEFAULT_MIN_EXPIRY_LEAD_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub confirmation_depth: u64,
    pub reorg_depth: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            confirmation_depth: DEFAULT_CONFIRMATION_DEPTH,
            reorg_depth: DEFAULT_REORG_DEPTH,
        }
    }
}

// ── NodeConfig ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: Option<String>,
    pub rpc_addr: Option<String>,
    pub bitcoin: Option<BitcoinConfig>,
    pub evm: Option<EvmConfig>,
    /// Account-model networks keyed by chain id (stringified in JSON).
    pub cosmos: HashMap<String, CosmosNetwork>,
    pub execution: ExecutionConfig,
    pub monitor: MonitorConfig,
}

impl NodeConfig {
    /// Resolve the execution model for a chain id, if configured.
    pub fn chain_kind(&self, chain: ChainId) -> Option<ChainKind> {
        if self.evm.as_ref().is_some_and(|e| e.chain_id == chain) {
            return Some(ChainKind::Evm);
        }
        if self.bitcoin.as_ref().is_some_and(|b| b.chain_id == chain) {
            return Some(ChainKind::Bitcoin);
        }
        if self.cosmos.contains_key(&chain.0.to_string()) {
            return Some(ChainKind::Cosmos);
        }
        None
    }

    pub fn cosmos_network(&self, chain: ChainId) -> Option<&CosmosNetwork> {
        self.cosmos.get(&chain.0.to_string())
    }
}
