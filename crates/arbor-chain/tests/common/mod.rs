//! Shared fixtures for the chain store integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::Connection;

use arbor_chain::{Chain, ChainSession};
use arbor_core::constants::{COIN, POW_LIMIT_BITS};
use arbor_core::dialect::Dialect;
use arbor_core::script::{Opcode, Operation, Script};
use arbor_core::types::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};

/// Dialect with a scriptable verdict and adjustable constants.
pub struct TestDialect {
    pub maturity: u64,
    pub scripts_pass: bool,
    pub interval: u64,
    pub timespan: u64,
}

impl Default for TestDialect {
    fn default() -> Self {
        Self {
            maturity: 0,
            scripts_pass: true,
            interval: arbor_core::constants::RETARGET_INTERVAL,
            timespan: arbor_core::constants::RETARGET_TIMESPAN,
        }
    }
}

impl Dialect for TestDialect {
    fn run_script(&self, _: &Script, _: &Script, _: &Transaction, _: usize) -> bool {
        self.scripts_pass
    }

    fn coinbase_maturity(&self) -> u64 {
        self.maturity
    }

    fn retarget_interval(&self) -> u64 {
        self.interval
    }

    fn retarget_timespan(&self) -> u64 {
        self.timespan
    }
}

/// In-memory chain engine with the given dialect.
pub fn open_chain(dialect: TestDialect) -> Chain {
    Chain::new(ChainSession::open_in_memory().unwrap(), Arc::new(dialect))
}

/// A minimal push-only script carrying a tag byte.
pub fn tag_script(tag: u8) -> Script {
    let mut script = Script::new();
    script.push_operation(Operation {
        code: Opcode::Special,
        data: Some(vec![tag; 4]),
    });
    script
}

/// Coinbase transaction, made unique by the tag in its locktime.
pub fn coinbase(tag: u32) -> Transaction {
    Transaction {
        version: 1,
        locktime: tag,
        inputs: vec![TxInput {
            previous_output_hash: Hash256::ZERO,
            previous_output_index: u32::MAX,
            script: Script::new(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput { value: 50 * COIN, script: tag_script(tag as u8) }],
    }
}

/// Transaction spending one previous output into one new output.
pub fn spend(previous: Hash256, index: u32, value: u64) -> Transaction {
    Transaction {
        version: 1,
        locktime: 0,
        inputs: vec![TxInput {
            previous_output_hash: previous,
            previous_output_index: index,
            script: tag_script(0xEE),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput { value, script: tag_script(0xCC) }],
    }
}

/// Assemble a block over the given transactions at the limit difficulty.
pub fn block(prev: Hash256, timestamp: u32, transactions: Vec<Transaction>) -> Block {
    let merkle_root = transactions
        .first()
        .map(|tx| tx.hash())
        .unwrap_or(Hash256::ZERO);
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: prev,
            merkle_root,
            timestamp,
            bits: POW_LIMIT_BITS,
            nonce: 0,
        },
        transactions,
    }
}

/// Stored coordinates and status of a block, looked up by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub space: i64,
    pub depth: i64,
    pub span_left: i64,
    pub span_right: i64,
    pub status: String,
}

pub fn stored(conn: &Connection, hash: &Hash256) -> Option<StoredBlock> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT space, depth, span_left, span_right, status
         FROM blocks WHERE block_hash = ?1",
        [hash.to_string()],
        |row| {
            Ok(StoredBlock {
                space: row.get(0)?,
                depth: row.get(1)?,
                span_left: row.get(2)?,
                span_right: row.get(3)?,
                status: row.get(4)?,
            })
        },
    )
    .optional()
    .unwrap()
}

pub fn chain_rows(conn: &Connection) -> Vec<(i64, f64, i64)> {
    let mut stmt = conn
        .prepare("SELECT chain_id, work, depth FROM chains ORDER BY chain_id")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

/// Full dump of the forest coordinates, ordered for comparisons.
pub fn forest_rows(conn: &Connection) -> Vec<(String, i64, i64, i64, i64, String)> {
    let mut stmt = conn
        .prepare(
            "SELECT block_hash, space, depth, span_left, span_right, status
             FROM blocks ORDER BY block_hash",
        )
        .unwrap();
    stmt.query_map([], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

/// Check the standing forest invariants.
///
/// Every interval is ordered, intervals within a space never partially
/// overlap, and the space-0 chain ids are exactly the leaf columns.
pub fn assert_forest_invariants(conn: &Connection) {
    let rows: Vec<(i64, i64, i64, i64)> = {
        let mut stmt = conn
            .prepare("SELECT space, depth, span_left, span_right FROM blocks")
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    };

    for &(space, depth, left, right) in &rows {
        assert!(left <= right, "inverted span in space {space}: [{left}, {right}]");
        assert!(depth >= 0);
    }

    for (i, &(space_a, depth_a, l_a, r_a)) in rows.iter().enumerate() {
        for &(space_b, depth_b, l_b, r_b) in rows.iter().skip(i + 1) {
            if space_a != space_b {
                continue;
            }
            let disjoint = r_a < l_b || r_b < l_a;
            let a_contains_b = l_a <= l_b && r_a >= r_b;
            let b_contains_a = l_b <= l_a && r_b >= r_a;
            assert!(
                disjoint || a_contains_b || b_contains_a,
                "partially overlapping intervals in space {space_a}: \
                 [{l_a}, {r_a}] and [{l_b}, {r_b}]"
            );
            if l_a == l_b && r_a == r_b {
                assert_ne!(
                    depth_a, depth_b,
                    "two blocks share interval [{l_a}, {r_a}] at depth {depth_a}"
                );
            }
        }
    }

    // Leaves of space 0: point intervals with nothing deeper inside them.
    let mut leaves = BTreeSet::new();
    for &(space, depth, left, right) in &rows {
        if space != 0 || left != right {
            continue;
        }
        let deeper = rows.iter().any(|&(s, d, l, r)| {
            s == 0 && d > depth && l >= left && r <= right
        });
        if !deeper {
            leaves.insert(left);
        }
    }
    let chain_ids: BTreeSet<i64> =
        chain_rows(conn).into_iter().map(|(chain_id, _, _)| chain_id).collect();
    assert_eq!(chain_ids, leaves, "chain ids do not match leaf columns");
}

/// Insert a bare header row with explicit coordinates. For tests that
/// exercise the branch-local queries without building full blocks.
pub fn put_header_row(
    conn: &Connection,
    tag: u32,
    prev_tag: u32,
    space: i64,
    depth: i64,
    left: i64,
    right: i64,
    when_created: i64,
    bits: u32,
    status: &str,
) -> i64 {
    let (bits_head, bits_body) = arbor_core::difficulty::split_bits(bits);
    conn.execute(
        "INSERT INTO blocks (
            block_hash, space, depth, span_left, span_right, version,
            prev_block_hash, merkle, when_created, bits_head, bits_body,
            nonce, status
         ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
        rusqlite::params![
            format!("{tag:064x}"),
            space,
            depth,
            left,
            right,
            format!("{prev_tag:064x}"),
            format!("{:064}", 0),
            when_created,
            bits_head,
            bits_body,
            status,
        ],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// Check that no graftable orphan root remains.
pub fn assert_fully_organized(conn: &Connection) {
    let stragglers: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM blocks AS block, blocks AS parent
             WHERE block.prev_block_hash = parent.block_hash
               AND block.space > 0 AND block.depth = 0",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stragglers, 0, "{stragglers} graftable orphan roots remain");
}
