//! Bitcoin script construction for the swap HTLC.
//!
//! Redeem script template (spend paths: preimage before the timelock,
//! refund after it):
//!
//! ```text
//! OP_IF
//!   OP_SHA256 <hashlock> OP_EQUALVERIFY
//!   <recipient_pubkey> OP_CHECKSIG
//! OP_ELSE
//!   <cltv_height> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!   <resolver_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! `OP_SHA256` (single round) is used so the on-script image equals the
//! hashlock committed on every other chain in the swap.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use fusionx_core::{BitcoinNetwork, Hashlock, SwapError};

// ── Opcodes ──────────────────────────────────────────────────────────────────

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_IF: u8 = 0x63;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;

// ── Primitives ───────────────────────────────────────────────────────────────

/// Append a minimal data push for `data` (direct push / PUSHDATA1/2).
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        1..=75 => {
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        76..=255 => {
            script.push(0x4c); // PUSHDATA1
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        _ => {
            script.push(0x4d); // PUSHDATA2
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}

/// Minimal CScriptNum encoding (little-endian, sign bit in the top byte).
/// Block heights are well under the 2^31 script-number cap.
pub fn script_num(value: u64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut v = value;
    while v > 0 {
        out.push((v & 0xFF) as u8);
        v >>= 8;
    }
    // A set high bit would read as negative; pad with a zero byte.
    if out.last().is_some_and(|b| b & 0x80 != 0) {
        out.push(0x00);
    }
    out
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// RIPEMD160(SHA256(data)), the script-hash / pubkey-hash primitive.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

// ── HTLC redeem script ───────────────────────────────────────────────────────

/// Inputs for the redeem script. Both pubkeys are 33-byte compressed SEC1.
#[derive(Clone, Debug)]
pub struct HtlcScriptParams {
    pub hashlock: Hashlock,
    pub recipient_pubkey: [u8; 33],
    pub resolver_pubkey: [u8; 33],
    /// Absolute block height for OP_CHECKLOCKTIMEVERIFY.
    pub cltv_height: u64,
}

/// Assemble the HTLC redeem script.
pub fn htlc_redeem_script(params: &HtlcScriptParams) -> Vec<u8> {
    let mut s = Vec::with_capacity(120);
    s.push(OP_IF);
    s.push(OP_SHA256);
    push_data(&mut s, params.hashlock.as_bytes());
    s.push(OP_EQUALVERIFY);
    push_data(&mut s, &params.recipient_pubkey);
    s.push(OP_CHECKSIG);
    s.push(OP_ELSE);
    push_data(&mut s, &script_num(params.cltv_height));
    s.push(OP_CHECKLOCKTIMEVERIFY);
    s.push(OP_DROP);
    push_data(&mut s, &params.resolver_pubkey);
    s.push(OP_CHECKSIG);
    s.push(OP_ENDIF);
    s
}

/// scriptPubKey committing to a redeem script: `OP_HASH160 <20> OP_EQUAL`.
pub fn p2sh_script_pubkey(redeem_script: &[u8]) -> Vec<u8> {
    let mut s = Vec::with_capacity(23);
    s.push(OP_HASH160);
    push_data(&mut s, &hash160(redeem_script));
    s.push(OP_EQUAL);
    s
}

/// Standard pay-to-pubkey-hash scriptPubKey.
pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut s = Vec::with_capacity(25);
    s.push(OP_DUP);
    s.push(OP_HASH160);
    push_data(&mut s, pubkey_hash);
    s.push(OP_EQUALVERIFY);
    s.push(OP_CHECKSIG);
    s
}

// ── Addresses ────────────────────────────────────────────────────────────────

/// Base58Check P2SH address for a redeem script on `network`.
pub fn p2sh_address(redeem_script: &[u8], network: BitcoinNetwork) -> String {
    bs58::encode(hash160(redeem_script))
        .with_check_version(network.p2sh_version())
        .into_string()
}

/// Base58Check P2PKH address for a compressed pubkey on `network`.
pub fn p2pkh_address(pubkey: &[u8; 33], network: BitcoinNetwork) -> String {
    bs58::encode(hash160(pubkey))
        .with_check_version(network.p2pkh_version())
        .into_string()
}

/// Decode a Base58Check address into its scriptPubKey, accepting both P2PKH
/// and P2SH version bytes of either network.
pub fn address_script_pubkey(address: &str) -> Result<Vec<u8>, SwapError> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| SwapError::MalformedOrder {
            field: "address",
            reason: e.to_string(),
        })?;
    if payload.len() != 21 {
        return Err(SwapError::MalformedOrder {
            field: "address",
            reason: format!("unexpected payload length {}", payload.len()),
        });
    }
    let version = payload[0];
    let mut h = [0u8; 20];
    h.copy_from_slice(&payload[1..]);

    match version {
        0x00 | 0x6F => Ok(p2pkh_script_pubkey(&h)),
        0x05 | 0xC4 => {
            let mut s = Vec::with_capacity(23);
            s.push(OP_HASH160);
            push_data(&mut s, &h);
            s.push(OP_EQUAL);
            Ok(s)
        }
        v => Err(SwapError::MalformedOrder {
            field: "address",
            reason: format!("unknown version byte 0x{v:02x}"),
        }),
    }
}
