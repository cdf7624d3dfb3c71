//! Raw legacy transaction model, serialization and SIGHASH_ALL signing.
//!
//! Only pre-segwit constructs are needed: the HTLC is plain P2SH and the
//! resolver wallet holds P2PKH outputs. Keeping the serializer here (rather
//! than behind a heavyweight chain library) makes the byte layout fully
//! auditable against the script in [`crate::script`].

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};

use fusionx_core::{SwapError, TxId};

use crate::script::{p2pkh_script_pubkey, push_data, sha256d};

/// SIGHASH_ALL.
pub const SIGHASH_ALL: u32 = 0x01;

/// Final sequence; opts the input out of locktime enforcement.
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// Non-final sequence required for nLockTime (and CLTV) to be checked.
pub const SEQUENCE_LOCKTIME: u32 = 0xFFFF_FFFE;

// ── Key handling ─────────────────────────────────────────────────────────────

/// secp256k1 signing key for the resolver's UTXO wallet.
pub struct BitcoinKey {
    signing_key: SigningKey,
}

impl BitcoinKey {
    pub fn from_hex(key_hex: &str) -> Result<Self, SwapError> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x")).map_err(|e| {
            SwapError::MalformedOrder { field: "key_hex", reason: e.to_string() }
        })?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|e| {
            SwapError::MalformedOrder { field: "key_hex", reason: e.to_string() }
        })?;
        Ok(Self { signing_key })
    }

    /// 33-byte compressed SEC1 public key.
    pub fn public_key(&self) -> [u8; 33] {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Hash160 of the compressed public key.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        crate::script::hash160(&self.public_key())
    }

    /// Sign a 32-byte digest; returns low-S DER with the sighash byte appended.
    pub fn sign_sighash(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SwapError> {
        let sig: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| SwapError::Other(format!("signing failed: {e}")))?;
        let sig = sig.normalize_s().unwrap_or(sig);
        let mut der = sig.to_der().as_bytes().to_vec();
        der.push(SIGHASH_ALL as u8);
        Ok(der)
    }
}

// ── Transaction model ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Display-order (big-endian hex) transaction id.
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    /// Wire bytes: txid reversed to little-endian, then vout.
    fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), SwapError> {
        let mut id = hex::decode(self.txid.as_str())
            .map_err(|e| SwapError::Serialization(format!("bad txid hex: {e}")))?;
        if id.len() != 32 {
            return Err(SwapError::Serialization(format!(
                "txid must be 32 bytes, got {}",
                id.len()
            )));
        }
        id.reverse();
        out.extend_from_slice(&id);
        out.extend_from_slice(&self.vout.to_le_bytes());
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug)]
pub struct TxOut {
    /// Value in sats.
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xFC => out.push(n as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

impl Transaction {
    pub fn new(lock_time: u32) -> Self {
        Self { version: 2, inputs: Vec::new(), outputs: Vec::new(), lock_time }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, SwapError> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.serialize_into(&mut out)?;
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        Ok(out)
    }

    pub fn to_hex(&self) -> Result<String, SwapError> {
        Ok(hex::encode(self.serialize()?))
    }

    /// Display-order transaction id of the serialized form.
    pub fn txid(&self) -> Result<TxId, SwapError> {
        let mut digest = sha256d(&self.serialize()?);
        digest.reverse();
        Ok(TxId::new(hex::encode(digest)))
    }

    /// Legacy SIGHASH_ALL digest for `input_index`, with `script_code` in
    /// place of that input's scriptSig and every other scriptSig empty.
    pub fn sighash_all(
        &self,
        input_index: usize,
        script_code: &[u8],
    ) -> Result<[u8; 32], SwapError> {
        if input_index >= self.inputs.len() {
            return Err(SwapError::Serialization(format!(
                "sighash input index {input_index} out of range"
            )));
        }
        let mut copy = self.clone();
        for (i, input) in copy.inputs.iter_mut().enumerate() {
            input.script_sig = if i == input_index { script_code.to_vec() } else { Vec::new() };
        }
        let mut preimage = copy.serialize()?;
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(sha256d(&preimage))
    }

    /// Sign `input_index` as a standard P2PKH spend with `key`.
    pub fn sign_p2pkh_input(
        &mut self,
        input_index: usize,
        key: &BitcoinKey,
    ) -> Result<(), SwapError> {
        let script_code = p2pkh_script_pubkey(&key.pubkey_hash());
        let digest = self.sighash_all(input_index, &script_code)?;
        let sig = key.sign_sighash(&digest)?;

        let mut script_sig = Vec::with_capacity(sig.len() + 35);
        push_data(&mut script_sig, &sig);
        push_data(&mut script_sig, &key.public_key());
        self.inputs[input_index].script_sig = script_sig;
        Ok(())
    }

    /// Conservative size estimate for fee purposes (legacy sizes).
    pub fn estimate_size(n_inputs: usize, n_outputs: usize, script_sig_size: usize) -> usize {
        10 + n_inputs * (40 + script_sig_size + 9) + n_outputs * 34
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::OP_1;

    fn test_key() -> BitcoinKey {
        BitcoinKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap()
    }

    fn dummy_outpoint(byte: u8) -> OutPoint {
        OutPoint { txid: TxId::new(hex::encode([byte; 32])), vout: 0 }
    }

    #[test]
    fn varint_boundaries() {
        let mut out = Vec::new();
        write_varint(&mut out, 0xFC);
        assert_eq!(out, vec![0xFC]);

        let mut out = Vec::new();
        write_varint(&mut out, 0xFD);
        assert_eq!(out, vec![0xFD, 0xFD, 0x00]);

        let mut out = Vec::new();
        write_varint(&mut out, 0x1_0000);
        assert_eq!(out, vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn key_derives_generator_pubkey() {
        // Private key 1 → the secp256k1 generator point.
        let key = test_key();
        assert_eq!(
            hex::encode(key.public_key()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn empty_tx_serialization() {
        let tx = Transaction::new(0);
        let bytes = tx.serialize().unwrap();
        // version(4) + in-count(1) + out-count(1) + locktime(4)
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..4], &2i32.to_le_bytes());
    }

    #[test]
    fn txid_is_reversed_double_sha() {
        let tx = Transaction::new(0);
        let bytes = tx.serialize().unwrap();
        let mut expect = sha256d(&bytes);
        expect.reverse();
        assert_eq!(tx.txid().unwrap().as_str(), hex::encode(expect));
    }

    #[test]
    fn outpoint_txid_bytes_are_reversed_on_wire() {
        let mut tx = Transaction::new(0);
        tx.inputs.push(TxIn {
            prevout: OutPoint { txid: TxId::new(format!("{}{}", "11".repeat(31), "22")), vout: 1 },
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        });
        let bytes = tx.serialize().unwrap();
        // First prevout byte on the wire is the last display byte.
        assert_eq!(bytes[5], 0x22);
        assert_eq!(bytes[6], 0x11);
    }

    #[test]
    fn sighash_differs_per_input() {
        let mut tx = Transaction::new(0);
        tx.inputs.push(TxIn { prevout: dummy_outpoint(1), script_sig: vec![], sequence: SEQUENCE_FINAL });
        tx.inputs.push(TxIn { prevout: dummy_outpoint(2), script_sig: vec![], sequence: SEQUENCE_FINAL });
        tx.outputs.push(TxOut { value: 1_000, script_pubkey: vec![OP_1] });

        let code = p2pkh_script_pubkey(&test_key().pubkey_hash());
        let h0 = tx.sighash_all(0, &code).unwrap();
        let h1 = tx.sighash_all(1, &code).unwrap();
        assert_ne!(h0, h1);
    }

    #[test]
    fn sighash_ignores_existing_script_sigs() {
        let code = p2pkh_script_pubkey(&test_key().pubkey_hash());

        let mut tx = Transaction::new(0);
        tx.inputs.push(TxIn { prevout: dummy_outpoint(1), script_sig: vec![], sequence: SEQUENCE_FINAL });
        tx.outputs.push(TxOut { value: 1_000, script_pubkey: vec![OP_1] });
        let clean = tx.sighash_all(0, &code).unwrap();

        tx.inputs[0].script_sig = vec![0xAA, 0xBB];
        let dirty = tx.sighash_all(0, &code).unwrap();
        assert_eq!(clean, dirty);
    }

    #[test]
    fn p2pkh_signing_produces_canonical_script_sig() {
        let key = test_key();
        let mut tx = Transaction::new(0);
        tx.inputs.push(TxIn { prevout: dummy_outpoint(3), script_sig: vec![], sequence: SEQUENCE_FINAL });
        tx.outputs.push(TxOut { value: 5_000, script_pubkey: vec![OP_1] });
        tx.sign_p2pkh_input(0, &key).unwrap();

        let script = &tx.inputs[0].script_sig;
        let sig_len = script[0] as usize;
        // DER signature + trailing sighash byte, then the 33-byte pubkey push.
        assert_eq!(script[sig_len], SIGHASH_ALL as u8);
        assert_eq!(script[1 + sig_len] as usize, 33);
        assert_eq!(&script[2 + sig_len..], &key.public_key()[..]);
    }

    #[test]
    fn sighash_index_out_of_range() {
        let tx = Transaction::new(0);
        assert!(tx.sighash_all(0, &[]).is_err());
    }
}
