//! Reconstruct domain objects from stored rows.
//!
//! Deserialization here is total: every failure means the stored data does
//! not round-trip and is reported as [`ChainError::Corrupt`], which aborts
//! the current run.

use rusqlite::{Connection, OptionalExtension};

use arbor_core::difficulty::join_bits;
use arbor_core::script::{decode_hex, Opcode, Operation, Script};
use arbor_core::types::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};

use crate::error::ChainError;

/// Coordinates of a stored block within the forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: i64,
    pub depth: i64,
    pub span_left: i64,
    pub span_right: i64,
    pub prev_block_id: Option<i64>,
}

/// Read-side view over the chain store.
pub struct Reader<'c> {
    conn: &'c Connection,
}

impl<'c> Reader<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Load a script's operations ordered by `operation_id`.
    pub fn select_script(&self, script_id: i64) -> Result<Script, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT opcode, data FROM operations
             WHERE script_id = ?1 ORDER BY operation_id ASC",
        )?;
        let mut rows = stmt.query([script_id])?;
        let mut script = Script::new();
        while let Some(row) = rows.next()? {
            let opcode: String = row.get(0)?;
            let code = opcode.parse::<Opcode>().map_err(|e| {
                ChainError::Corrupt(format!("script {script_id}: {e}"))
            })?;
            let data: Option<String> = row.get(1)?;
            let data = data
                .map(|hex| {
                    decode_hex(&hex).map_err(|e| {
                        ChainError::Corrupt(format!("script {script_id}: {e}"))
                    })
                })
                .transpose()?;
            script.push_operation(Operation { code, data });
        }
        Ok(script)
    }

    /// Load a transaction's inputs ordered by `index_in_parent`.
    pub fn select_inputs(&self, transaction_id: i64) -> Result<Vec<TxInput>, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT previous_output_hash, previous_output_index, script_id, sequence
             FROM inputs
             WHERE transaction_id = ?1 ORDER BY index_in_parent ASC",
        )?;
        let mut rows = stmt.query([transaction_id])?;
        let mut inputs = Vec::new();
        while let Some(row) = rows.next()? {
            let hash: String = row.get(0)?;
            let previous_output_hash = parse_hash(&hash, "previous_output_hash")?;
            let previous_output_index: i64 = row.get(1)?;
            let script_id: i64 = row.get(2)?;
            let sequence: i64 = row.get(3)?;
            inputs.push(TxInput {
                previous_output_hash,
                previous_output_index: previous_output_index as u32,
                script: self.select_script(script_id)?,
                sequence: sequence as u32,
            });
        }
        Ok(inputs)
    }

    /// Load a transaction's outputs ordered by `index_in_parent`.
    pub fn select_outputs(&self, transaction_id: i64) -> Result<Vec<TxOutput>, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT sql_to_internal(value), script_id
             FROM outputs
             WHERE transaction_id = ?1 ORDER BY index_in_parent ASC",
        )?;
        let mut rows = stmt.query([transaction_id])?;
        let mut outputs = Vec::new();
        while let Some(row) = rows.next()? {
            let value: i64 = row.get(0)?;
            let script_id: i64 = row.get(1)?;
            outputs.push(TxOutput {
                value: value as u64,
                script: self.select_script(script_id)?,
            });
        }
        Ok(outputs)
    }

    /// Reassemble a full block: header plus transactions joined through
    /// `transactions_parents` in `index_in_block` order.
    pub fn read_block(&self, block_id: i64) -> Result<Block, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT version, prev_block_hash, merkle, when_created,
                    bits_head, bits_body, nonce
             FROM blocks WHERE block_id = ?1",
        )?;
        let header = stmt
            .query_row([block_id], |row| {
                let version: i64 = row.get(0)?;
                let prev: String = row.get(1)?;
                let merkle: String = row.get(2)?;
                let when_created: i64 = row.get(3)?;
                let bits_head: i64 = row.get(4)?;
                let bits_body: i64 = row.get(5)?;
                let nonce: i64 = row.get(6)?;
                Ok((version, prev, merkle, when_created, bits_head, bits_body, nonce))
            })
            .optional()?
            .ok_or_else(|| ChainError::Corrupt(format!("missing block {block_id}")))?;
        let (version, prev, merkle, when_created, bits_head, bits_body, nonce) = header;

        let header = BlockHeader {
            version: version as u32,
            prev_block_hash: parse_hash(&prev, "prev_block_hash")?,
            merkle_root: parse_hash(&merkle, "merkle")?,
            timestamp: when_created as u32,
            bits: join_bits(bits_head as u32, bits_body as u32),
            nonce: nonce as u32,
        };

        Ok(Block {
            header,
            transactions: self.read_transactions(block_id)?,
        })
    }

    /// Transactions of a block in `index_in_block` order.
    pub fn read_transactions(&self, block_id: i64) -> Result<Vec<Transaction>, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT transactions.transaction_id, transactions.version, transactions.locktime
             FROM transactions_parents
             JOIN transactions
               ON transactions.transaction_id = transactions_parents.transaction_id
             WHERE block_id = ?1
             ORDER BY index_in_block ASC",
        )?;
        let ids: Vec<(i64, i64, i64)> = stmt
            .query_map([block_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut transactions = Vec::with_capacity(ids.len());
        for (transaction_id, version, locktime) in ids {
            transactions.push(Transaction {
                version: version as u32,
                locktime: locktime as u32,
                inputs: self.select_inputs(transaction_id)?,
                outputs: self.select_outputs(transaction_id)?,
            });
        }
        Ok(transactions)
    }

    /// Forest coordinates of a block.
    pub fn read_block_info(&self, block_id: i64) -> Result<BlockInfo, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT depth, span_left, span_right, prev_block_id
             FROM blocks WHERE block_id = ?1",
        )?;
        stmt.query_row([block_id], |row| {
            Ok(BlockInfo {
                block_id,
                depth: row.get(0)?,
                span_left: row.get(1)?,
                span_right: row.get(2)?,
                prev_block_id: row.get(3)?,
            })
        })
        .optional()?
        .ok_or_else(|| ChainError::Corrupt(format!("missing block {block_id}")))
    }
}

fn parse_hash(hex: &str, column: &str) -> Result<Hash256, ChainError> {
    Hash256::from_hex(hex)
        .ok_or_else(|| ChainError::Corrupt(format!("bad {column} value: {hex}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChainSession;

    fn session_with_script() -> ChainSession {
        let session = ChainSession::open_in_memory().unwrap();
        let conn = session.connection();
        conn.execute("INSERT INTO scripts (script_id) VALUES (1)", []).unwrap();
        conn.execute(
            "INSERT INTO operations (script_id, operation_id, opcode, data)
             VALUES (1, 0, 'special', 'deadbeef'), (1, 1, 'checksig', NULL)",
            [],
        )
        .unwrap();
        session
    }

    #[test]
    fn select_script_orders_operations() {
        let session = session_with_script();
        let script = Reader::new(session.connection()).select_script(1).unwrap();
        let ops = script.operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].code, Opcode::Special);
        assert_eq!(ops[0].data.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(ops[1].code, Opcode::CheckSig);
        assert_eq!(ops[1].data, None);
    }

    #[test]
    fn select_script_missing_is_empty() {
        let session = ChainSession::open_in_memory().unwrap();
        let script = Reader::new(session.connection()).select_script(42).unwrap();
        assert!(script.is_empty());
    }

    #[test]
    fn unknown_opcode_is_corruption() {
        let session = session_with_script();
        session
            .connection()
            .execute(
                "UPDATE operations SET opcode = 'checklocktime' WHERE operation_id = 1",
                [],
            )
            .unwrap();
        let err = Reader::new(session.connection()).select_script(1).unwrap_err();
        assert!(matches!(err, ChainError::Corrupt(_)));
    }

    #[test]
    fn bad_hex_data_is_corruption() {
        let session = session_with_script();
        session
            .connection()
            .execute("UPDATE operations SET data = 'xyz' WHERE operation_id = 0", [])
            .unwrap();
        let err = Reader::new(session.connection()).select_script(1).unwrap_err();
        assert!(matches!(err, ChainError::Corrupt(_)));
    }

    #[test]
    fn read_missing_block_is_corruption() {
        let session = ChainSession::open_in_memory().unwrap();
        let err = Reader::new(session.connection()).read_block(9).unwrap_err();
        assert!(matches!(err, ChainError::Corrupt(_)));
    }
}
