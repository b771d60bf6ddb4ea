//! Core chain types: hashes, transactions, blocks.
//!
//! Identity hashes (block hash, transaction hash) are double SHA-256 over the
//! canonical little-endian encoding produced by the `to_bytes` methods. The
//! relational store persists these types column-by-column; the canonical
//! encoding exists so a block read back from the store can be compared
//! byte-for-byte against what was ingested.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::script::Script;

/// A 32-byte hash value, displayed and stored as lowercase hex.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outputs and
    /// the genesis previous-block reference.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse from a 64-character lowercase or uppercase hex string.
    ///
    /// Returns `None` on wrong length or non-hex characters. The store layer
    /// treats a `None` here as data corruption.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Double SHA-256 of a byte slice.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}

/// A transaction input, spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// Hash of the transaction holding the spent output. Zero for coinbase.
    pub previous_output_hash: Hash256,
    /// Output index within that transaction. `u32::MAX` for coinbase.
    pub previous_output_index: u32,
    /// Unlocking script.
    pub script: Script,
    /// Sequence number.
    pub sequence: u32,
}

impl TxInput {
    /// Whether this input carries the null previous-output marker.
    pub fn is_null_previous(&self) -> bool {
        self.previous_output_hash.is_zero() && self.previous_output_index == u32::MAX
    }
}

/// A transaction output, creating a spendable value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in satoshi.
    pub value: u64,
    /// Locking script.
    pub script: Script,
}

/// A transaction transferring value between outputs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub locktime: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Whether this is a coinbase: a single input with the null previous output.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_null_previous()
    }

    /// Canonical little-endian encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.previous_output_hash.as_bytes());
            data.extend_from_slice(&input.previous_output_index.to_le_bytes());
            let script = input.script.to_bytes();
            data.extend_from_slice(&(script.len() as u32).to_le_bytes());
            data.extend_from_slice(&script);
            data.extend_from_slice(&input.sequence.to_le_bytes());
        }
        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.value.to_le_bytes());
            let script = output.script.to_bytes();
            data.extend_from_slice(&(script.len() as u32).to_le_bytes());
            data.extend_from_slice(&script);
        }
        data.extend_from_slice(&self.locktime.to_le_bytes());
        data
    }

    /// Transaction identity: double SHA-256 of the canonical encoding.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    /// Sum of all output values. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Block header carrying the proof-of-work commitment.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the previous block header. Zero for genesis.
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u32,
    /// Compact difficulty target.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header length: three u32 fields, two hashes, bits and nonce.
    pub const ENCODED_LEN: usize = 4 + 32 + 32 + 4 + 4 + 4;

    /// Canonical 80-byte little-endian encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::ENCODED_LEN);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_block_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.bits.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data
    }

    /// Block identity: double SHA-256 of the canonical header encoding.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }
}

/// A complete block: header plus transactions in consensus order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// First transaction must be the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Canonical encoding: header, transaction count, transactions in order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = self.header.to_bytes();
        data.extend_from_slice(&(self.transactions.len() as u32).to_le_bytes());
        for tx in &self.transactions {
            data.extend_from_slice(&tx.to_bytes());
        }
        data
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::script::{Opcode, Operation};

    fn sample_script() -> Script {
        let mut script = Script::new();
        script.push_operation(Operation {
            code: Opcode::Special,
            data: Some(vec![0xAA; 20]),
        });
        script.push_operation(Operation {
            code: Opcode::CheckSig,
            data: None,
        });
        script
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            locktime: 0,
            inputs: vec![TxInput {
                previous_output_hash: Hash256::ZERO,
                previous_output_index: u32::MAX,
                script: Script::new(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                script: sample_script(),
            }],
        }
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            locktime: 0,
            inputs: vec![TxInput {
                previous_output_hash: Hash256([0x11; 32]),
                previous_output_index: 0,
                script: sample_script(),
                sequence: 0xffff_fffe,
            }],
            outputs: vec![TxOutput {
                value: 49 * COIN,
                script: sample_script(),
            }],
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: Hash256::ZERO,
            merkle_root: Hash256([0x22; 32]),
            timestamp: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        }
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash256_hex_round_trip() {
        let h = Hash256([0xC3; 32]);
        assert_eq!(Hash256::from_hex(&h.to_string()), Some(h));
    }

    #[test]
    fn hash256_from_hex_rejects_garbage() {
        assert_eq!(Hash256::from_hex("abc"), None);
        assert_eq!(Hash256::from_hex(&"zz".repeat(32)), None);
    }

    #[test]
    fn hash256_from_hex_accepts_uppercase() {
        let h = Hash256([0xC3; 32]);
        assert_eq!(Hash256::from_hex(&h.to_string().to_uppercase()), Some(h));
    }

    // --- Transactions ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn multi_input_not_coinbase() {
        let mut tx = sample_coinbase();
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn tx_hash_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.hash(), tx.hash());
    }

    #[test]
    fn tx_hash_changes_with_locktime() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.locktime = 7;
        assert_ne!(tx1.hash(), tx2.hash());
    }

    #[test]
    fn total_output_value_sums() {
        let mut tx = sample_tx();
        tx.outputs.push(TxOutput { value: COIN, script: Script::new() });
        assert_eq!(tx.total_output_value(), Some(50 * COIN));
    }

    #[test]
    fn total_output_value_overflow_is_none() {
        let mut tx = sample_tx();
        tx.outputs[0].value = u64::MAX;
        tx.outputs.push(TxOutput { value: 1, script: Script::new() });
        assert_eq!(tx.total_output_value(), None);
    }

    // --- Headers and blocks ---

    #[test]
    fn header_encoding_length() {
        assert_eq!(sample_header().to_bytes().len(), BlockHeader::ENCODED_LEN);
        assert_eq!(BlockHeader::ENCODED_LEN, 80);
    }

    #[test]
    fn header_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1;
        h2.nonce += 1;
        assert_ne!(h1.hash(), h2.hash());
    }

    #[test]
    fn block_encoding_contains_all_transactions() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase(), sample_tx()],
        };
        let bytes = block.to_bytes();
        let expected = BlockHeader::ENCODED_LEN
            + 4
            + block.transactions[0].to_bytes().len()
            + block.transactions[1].to_bytes().len();
        assert_eq!(bytes.len(), expected);
    }

    #[test]
    fn block_coinbase_accessor() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase()],
        };
        assert!(block.coinbase().unwrap().is_coinbase());

        let empty = Block { header: sample_header(), transactions: vec![] };
        assert!(empty.coinbase().is_none());
    }
}
