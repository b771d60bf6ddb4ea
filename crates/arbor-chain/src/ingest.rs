//! Inbound write path: insert parsed blocks as `orphan` rows.
//!
//! The genesis block seeds the main tree (`space = 0`) as `valid` together
//! with its chain row. Every later arrival opens a fresh orphan space rooted
//! at `(depth = 0, span = [0, 0])`; the organizer grafts it under its parent
//! once that parent is present. Transactions are deduplicated by hash so a
//! transaction carried by competing forks is stored once and linked from
//! each block through `transactions_parents`.

use rusqlite::{params, Connection, OptionalExtension};

use arbor_core::difficulty::split_bits;
use arbor_core::script::{encode_hex, Script};
use arbor_core::types::Block;

use crate::error::ChainError;
use crate::session::satoshi_to_decimal;

/// Insert the genesis block as the root of the main tree.
///
/// The block lands as `valid` at `(space = 0, depth = 0, span = [0, 0])`
/// with chain 0 carrying its work. Fails with
/// [`ChainError::AlreadyInitialized`] if any block is already stored.
pub fn store_genesis(conn: &Connection, block: &Block) -> Result<i64, ChainError> {
    let tx = conn.unchecked_transaction()?;
    let populated: i64 = tx.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
    if populated != 0 {
        return Err(ChainError::AlreadyInitialized);
    }
    let block_id = insert_block_row(&tx, block, 0, 0, "valid")?;
    insert_block_transactions(&tx, block_id, block)?;
    let (bits_head, bits_body) = split_bits(block.header.bits);
    tx.execute(
        "INSERT INTO chains (chain_id, work, depth)
         VALUES (0, difficulty(?1, ?2), 0)",
        params![bits_head, bits_body],
    )?;
    tx.commit()?;
    Ok(block_id)
}

/// Insert a block as the root of a fresh orphan space.
///
/// The caller is expected to raise the barrier afterwards so a later
/// organize cycle can graft the new space under its parent.
pub fn store_block(conn: &Connection, block: &Block) -> Result<i64, ChainError> {
    let tx = conn.unchecked_transaction()?;
    let hash = block.header.hash().to_string();
    let existing: Option<i64> = tx
        .query_row(
            "SELECT block_id FROM blocks WHERE block_hash = ?1",
            [&hash],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(ChainError::DuplicateBlock(hash));
    }
    let space: i64 =
        tx.query_row("SELECT IFNULL(MAX(space), 0) + 1 FROM blocks", [], |row| row.get(0))?;
    let block_id = insert_block_row(&tx, block, space, 0, "orphan")?;
    insert_block_transactions(&tx, block_id, block)?;
    tx.commit()?;
    Ok(block_id)
}

fn insert_block_row(
    conn: &Connection,
    block: &Block,
    space: i64,
    depth: i64,
    status: &str,
) -> Result<i64, ChainError> {
    let header = &block.header;
    let (bits_head, bits_body) = split_bits(header.bits);
    conn.execute(
        "INSERT INTO blocks (
            block_hash, space, depth, span_left, span_right,
            version, prev_block_hash, merkle, when_created,
            bits_head, bits_body, nonce, status
         ) VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            header.hash().to_string(),
            space,
            depth,
            header.version,
            header.prev_block_hash.to_string(),
            header.merkle_root.to_string(),
            header.timestamp,
            bits_head,
            bits_body,
            header.nonce,
            status,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_block_transactions(
    conn: &Connection,
    block_id: i64,
    block: &Block,
) -> Result<(), ChainError> {
    for (index_in_block, transaction) in block.transactions.iter().enumerate() {
        let hash = transaction.hash().to_string();
        let known: Option<i64> = conn
            .query_row(
                "SELECT transaction_id FROM transactions WHERE transaction_hash = ?1",
                [&hash],
                |row| row.get(0),
            )
            .optional()?;
        let transaction_id = match known {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO transactions (transaction_hash, version, locktime)
                     VALUES (?1, ?2, ?3)",
                    params![hash, transaction.version, transaction.locktime],
                )?;
                let transaction_id = conn.last_insert_rowid();
                for (index, input) in transaction.inputs.iter().enumerate() {
                    let script_id = save_script(conn, &input.script)?;
                    conn.execute(
                        "INSERT INTO inputs (
                            transaction_id, index_in_parent, script_id,
                            previous_output_hash, previous_output_index, sequence
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            transaction_id,
                            index as i64,
                            script_id,
                            input.previous_output_hash.to_string(),
                            input.previous_output_index,
                            input.sequence,
                        ],
                    )?;
                }
                for (index, output) in transaction.outputs.iter().enumerate() {
                    let script_id = save_script(conn, &output.script)?;
                    conn.execute(
                        "INSERT INTO outputs (
                            transaction_id, index_in_parent, script_id, value
                         ) VALUES (?1, ?2, ?3, ?4)",
                        params![
                            transaction_id,
                            index as i64,
                            script_id,
                            satoshi_to_decimal(output.value),
                        ],
                    )?;
                }
                transaction_id
            }
        };
        conn.execute(
            "INSERT INTO transactions_parents (block_id, transaction_id, index_in_block)
             VALUES (?1, ?2, ?3)",
            params![block_id, transaction_id, index_in_block as i64],
        )?;
    }
    Ok(())
}

fn save_script(conn: &Connection, script: &Script) -> Result<i64, ChainError> {
    conn.execute("INSERT INTO scripts DEFAULT VALUES", [])?;
    let script_id = conn.last_insert_rowid();
    for (operation_id, op) in script.operations().iter().enumerate() {
        conn.execute(
            "INSERT INTO operations (script_id, operation_id, opcode, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                script_id,
                operation_id as i64,
                op.code.as_str(),
                op.data.as_deref().map(encode_hex),
            ],
        )?;
    }
    Ok(script_id)
}
