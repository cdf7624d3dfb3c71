//! UTXO-chain executor: HTLC script construction, raw transaction building
//! and signing, UTXO management, and the Esplora-style chain API client.
//!
//! The HTLC redeem script commits to the swap's SHA-256 hashlock and an
//! absolute CLTV height; claim spends with the preimage, refund spends after
//! the timelock. Everything here is plain legacy (pre-segwit) P2SH, which
//! every BTC-class chain accepts.

pub mod api;
pub mod htlc;
pub mod script;
pub mod tx;
pub mod utxo;

pub use api::{ApiUtxo, BitcoinApi, EsploraClient, MockBitcoinApi};
pub use htlc::{HtlcCreation, HtlcExecutor};
pub use script::{htlc_redeem_script, p2sh_address, HtlcScriptParams};
pub use tx::{BitcoinKey, OutPoint, Transaction, TxIn, TxOut};
pub use utxo::{Utxo, UtxoManager, UtxoSelection};
