//! Legacy (pre-1559) transaction construction and EIP-155 signing.
//!
//! The factory chains this executor targets all accept gas-price
//! transactions, so the simpler envelope is used throughout: RLP of
//! `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]` with
//! `v = recovery_id + 35 + 2·chain_id`.

use k256::ecdsa::SigningKey;
use primitive_types::{H160, U256};
use rlp::RlpStream;

use fusionx_core::{SwapError, TxId};

use crate::abi::keccak256;

/// secp256k1 signing key for the resolver's EVM account.
pub struct EvmKey {
    signing_key: SigningKey,
}

impl EvmKey {
    pub fn from_hex(key_hex: &str) -> Result<Self, SwapError> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x")).map_err(|e| {
            SwapError::MalformedOrder { field: "key_hex", reason: e.to_string() }
        })?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|e| {
            SwapError::MalformedOrder { field: "key_hex", reason: e.to_string() }
        })?;
        Ok(Self { signing_key })
    }

    /// Keccak-derived account address.
    pub fn address(&self) -> H160 {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        H160::from_slice(&hash[12..])
    }

    fn sign_digest(&self, digest: &[u8; 32]) -> Result<(U256, U256, u8), SwapError> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SwapError::Other(format!("signing failed: {e}")))?;
        // Chains reject high-S; normalizing flips the recovery parity.
        let (sig, recid) = match sig.normalize_s() {
            Some(normalized) => (
                normalized,
                k256::ecdsa::RecoveryId::from_byte(recid.to_byte() ^ 1)
                    .ok_or_else(|| SwapError::Other("bad recovery id".into()))?,
            ),
            None => (sig, recid),
        };
        let r = U256::from_big_endian(sig.r().to_bytes().as_slice());
        let s = U256::from_big_endian(sig.s().to_bytes().as_slice());
        Ok((r, s, recid.to_byte()))
    }
}

/// Unsigned legacy transaction body.
#[derive(Clone, Debug)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTx {
    fn rlp_signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut s = RlpStream::new_list(9);
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        s.append(&self.to);
        s.append(&self.value);
        s.append(&self.data);
        s.append(&chain_id);
        s.append(&0u8);
        s.append(&0u8);
        s.out().to_vec()
    }

    /// Sign under EIP-155 and return the raw bytes for `sendRawTransaction`.
    pub fn sign(&self, key: &EvmKey, chain_id: u64) -> Result<Vec<u8>, SwapError> {
        let digest = keccak256(&self.rlp_signing_payload(chain_id));
        let (r, s_val, recovery) = key.sign_digest(&digest)?;
        let v = recovery as u64 + 35 + 2 * chain_id;

        let mut s = RlpStream::new_list(9);
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        s.append(&self.to);
        s.append(&self.value);
        s.append(&self.data);
        s.append(&v);
        s.append(&r);
        s.append(&s_val);
        Ok(s.out().to_vec())
    }
}

/// Transaction hash of a signed raw transaction.
pub fn raw_tx_hash(raw: &[u8]) -> TxId {
    TxId::new(format!("0x{}", hex::encode(keccak256(raw))))
}
