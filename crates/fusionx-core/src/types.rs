use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Token amount in base units. u128 covers 18-decimal EVM amounts for any
/// realistic order size; the EVM executor widens to U256 at the wire.
pub type Amount = u128;

fn decode_hex_32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ── OrderHash ────────────────────────────────────────────────────────────────

/// 32-byte order identifier, assigned by the source-chain protocol.
/// Primary key for every context, log line and chain lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderHash(pub [u8; 32]);

impl OrderHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Accepts with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_hex_32(s).map(Self)
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderHash({}…)", &self.to_hex()[..16])
    }
}

// ── Hashlock ─────────────────────────────────────────────────────────────────

/// 32-byte hashlock: SHA-256 of the maker-chosen secret. The same image is
/// committed on every chain taking part in the swap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hashlock(pub [u8; 32]);

impl Hashlock {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_hex_32(s).map(Self)
    }

    /// Compute the hashlock for a given preimage.
    pub fn of(secret: &Secret) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&digest);
        Self(arr)
    }
}

impl fmt::Display for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashlock({}…)", &self.to_hex()[..16])
    }
}

// ── Secret ───────────────────────────────────────────────────────────────────

/// 32-byte preimage. Chosen by the maker, observed on-chain by the monitor,
/// never generated by this process. Zeroed on drop; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(pub [u8; 32]);

impl Secret {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_hex_32(s).map(Self)
    }

    /// True iff SHA-256(self) equals `hashlock`.
    pub fn verify(&self, hashlock: &Hashlock) -> bool {
        Hashlock::of(self) == *hashlock
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(…)")
    }
}

// ── TxId ─────────────────────────────────────────────────────────────────────

/// Chain transaction identifier, kept as the hex string the chain API hands
/// back (EVM 0x-prefixed, Bitcoin/Cosmos bare hex). Opaque to the engine.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub String);

impl TxId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = if self.0.len() > 18 { &self.0[..18] } else { &self.0 };
        write!(f, "TxId({short}…)")
    }
}

// ── ChainId / ChainKind ──────────────────────────────────────────────────────

/// Numeric chain identifier as carried in orders (EVM chain id, or a
/// protocol-assigned id for non-EVM destinations).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

/// Execution model of a configured chain. Determines which executor owns
/// destination-side work for an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    Evm,
    Cosmos,
    Bitcoin,
}

// ── TxRef ────────────────────────────────────────────────────────────────────

/// Reference to an observed on-chain event: enough to deduplicate and to
/// re-check canonicality after a reorg.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub chain_id: ChainId,
    pub tx_hash: TxId,
    pub block_number: u64,
    pub log_index: u64,
}
