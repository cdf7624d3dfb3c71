//! ABI encoding for the factory/registry calls and the SecretRevealed event.
//!
//! Call data is built as 4-byte selector + `ethabi`-encoded arguments; return
//! data is decoded with `ethabi` against the expected parameter types.

use ethabi::{ParamType, Token};
use primitive_types::{H160, H256, U256};
use sha3::{Digest, Keccak256};

use fusionx_core::{Hashlock, OrderHash, Secret, SwapError};

use crate::rpc::EvmLog;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// First four bytes of the Keccak-256 of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn call_data(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(ethabi::encode(tokens));
    data
}

// ── Factory calls ────────────────────────────────────────────────────────────

/// `matchFusionOrder(bytes32 orderHash)`, payable; carries the safety deposit.
pub fn match_fusion_order(order_hash: &OrderHash) -> Vec<u8> {
    call_data(
        "matchFusionOrder(bytes32)",
        &[Token::FixedBytes(order_hash.as_bytes().to_vec())],
    )
}

/// `completeFusionOrder(bytes32 orderHash, bytes32 secret)`.
pub fn complete_fusion_order(order_hash: &OrderHash, secret: &Secret) -> Vec<u8> {
    call_data(
        "completeFusionOrder(bytes32,bytes32)",
        &[
            Token::FixedBytes(order_hash.as_bytes().to_vec()),
            Token::FixedBytes(secret.as_bytes().to_vec()),
        ],
    )
}

/// `sourceEscrows(bytes32 orderHash) → address`.
pub fn source_escrows(order_hash: &OrderHash) -> Vec<u8> {
    call_data(
        "sourceEscrows(bytes32)",
        &[Token::FixedBytes(order_hash.as_bytes().to_vec())],
    )
}

pub fn decode_address(data: &[u8]) -> Result<H160, SwapError> {
    let tokens = ethabi::decode(&[ParamType::Address], data)
        .map_err(|e| SwapError::Serialization(format!("address return: {e}")))?;
    match tokens.first() {
        Some(Token::Address(addr)) => Ok(*addr),
        _ => Err(SwapError::Serialization("missing address in return data".into())),
    }
}

// ── Registry calls ───────────────────────────────────────────────────────────

/// `calculateMinSafetyDeposit(uint256 dstChainId, uint256 amount) → uint256`.
pub fn calculate_min_safety_deposit(dst_chain_id: u64, amount: U256) -> Vec<u8> {
    call_data(
        "calculateMinSafetyDeposit(uint256,uint256)",
        &[Token::Uint(U256::from(dst_chain_id)), Token::Uint(amount)],
    )
}

pub fn decode_uint(data: &[u8]) -> Result<U256, SwapError> {
    let tokens = ethabi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| SwapError::Serialization(format!("uint return: {e}")))?;
    match tokens.first() {
        Some(Token::Uint(v)) => Ok(*v),
        _ => Err(SwapError::Serialization("missing uint in return data".into())),
    }
}

// ── ERC-20 ───────────────────────────────────────────────────────────────────

/// `transfer(address to, uint256 amount)`.
pub fn erc20_transfer(to: H160, amount: U256) -> Vec<u8> {
    call_data(
        "transfer(address,uint256)",
        &[Token::Address(to), Token::Uint(amount)],
    )
}

// ── SecretRevealed event ─────────────────────────────────────────────────────

const SECRET_REVEALED_SIGNATURE: &str = "SecretRevealed(bytes32,bytes32)";

/// topic0 of `SecretRevealed(bytes32 indexed orderHash, bytes32 secret)`.
pub fn secret_revealed_topic() -> H256 {
    H256(keccak256(SECRET_REVEALED_SIGNATURE.as_bytes()))
}

/// Decode a SecretRevealed log: order hash from topic1, preimage from data.
/// The hashlock check happens later in the engine; this only validates shape.
pub fn decode_secret_revealed(log: &EvmLog) -> Result<(OrderHash, Secret), SwapError> {
    if log.topics.first() != Some(&secret_revealed_topic()) {
        return Err(SwapError::Serialization("not a SecretRevealed log".into()));
    }
    let order_topic = log
        .topics
        .get(1)
        .ok_or_else(|| SwapError::Serialization("SecretRevealed missing orderHash topic".into()))?;
    let tokens = ethabi::decode(&[ParamType::FixedBytes(32)], &log.data)
        .map_err(|e| SwapError::Serialization(format!("SecretRevealed data: {e}")))?;
    let secret_bytes = match tokens.into_iter().next() {
        Some(Token::FixedBytes(b)) if b.len() == 32 => b,
        _ => return Err(SwapError::Serialization("SecretRevealed bad secret encoding".into())),
    };
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&secret_bytes);
    Ok((OrderHash::from_bytes(log_topic_bytes(order_topic)), Secret::from_bytes(secret)))
}

fn log_topic_bytes(topic: &H256) -> [u8; 32] {
    topic.0
}

/// Build a SecretRevealed log body (mock chains and tests).
pub fn encode_secret_revealed(order_hash: &OrderHash, secret: &Secret) -> (Vec<H256>, Vec<u8>) {
    let topics = vec![secret_revealed_topic(), H256(*order_hash.as_bytes())];
    let data = ethabi::encode(&[Token::FixedBytes(secret.as_bytes().to_vec())]);
    (topics, data)
}

/// Sanity helper used at intake: the hashlock must be the SHA-256 image of a
/// 32-byte preimage space: a shape-only check on the hex encoding.
pub fn is_valid_hashlock_hex(s: &str) -> bool {
    Hashlock::from_hex(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionx_core::TxId;

    #[test]
    fn erc20_transfer_selector_matches_known_value() {
        // transfer(address,uint256) → 0xa9059cbb, the canonical ERC-20 id.
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn match_order_call_data_layout() {
        let order = OrderHash::from_bytes([0xAA; 32]);
        let data = match_fusion_order(&order);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[4..], order.as_bytes());
    }

    #[test]
    fn complete_order_carries_both_words() {
        let order = OrderHash::from_bytes([0xAA; 32]);
        let secret = Secret::from_bytes([0xBB; 32]);
        let data = complete_fusion_order(&order, &secret);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[4..36], order.as_bytes());
        assert_eq!(&data[36..68], secret.as_bytes());
    }

    #[test]
    fn address_round_trip() {
        let addr = H160::from_low_u64_be(0xDEADBEEF);
        let encoded = ethabi::encode(&[Token::Address(addr)]);
        assert_eq!(decode_address(&encoded).unwrap(), addr);
    }

    #[test]
    fn uint_round_trip() {
        let value = U256::from(123_456_789u64);
        let encoded = ethabi::encode(&[Token::Uint(value)]);
        assert_eq!(decode_uint(&encoded).unwrap(), value);
    }

    #[test]
    fn secret_revealed_round_trip() {
        let order = OrderHash::from_bytes([0x01; 32]);
        let secret = Secret::from_bytes([0x02; 32]);
        let (topics, data) = encode_secret_revealed(&order, &secret);
        let log = EvmLog {
            address: H160::zero(),
            topics,
            data,
            block_number: 10,
            tx_hash: TxId::new("0xabc"),
            log_index: 0,
        };
        let (got_order, got_secret) = decode_secret_revealed(&log).unwrap();
        assert_eq!(got_order, order);
        assert_eq!(got_secret, secret);
    }

    #[test]
    fn foreign_log_is_rejected() {
        let log = EvmLog {
            address: H160::zero(),
            topics: vec![H256(keccak256(b"Transfer(address,address,uint256)"))],
            data: vec![],
            block_number: 10,
            tx_hash: TxId::new("0xabc"),
            log_index: 0,
        };
        assert!(decode_secret_revealed(&log).is_err());
    }
}
