//! SQL session: schema, stored functions, prepared-statement cache.
//!
//! A [`ChainSession`] owns one SQLite connection with the chain schema
//! applied and the two stored functions the schema contract requires
//! registered on it: `difficulty(bits_head, bits_body)` computes a block's
//! work contribution and `sql_to_internal(value)` coerces the decimal money
//! column to integer satoshi. All components share the session's statement
//! cache through `prepare_cached`, so statement lifetime is bound to the
//! session.

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use arbor_core::constants::COIN;
use arbor_core::difficulty;

use crate::error::ChainError;

/// Statements kept alive in the connection's prepared-statement cache.
const STATEMENT_CACHE_CAPACITY: usize = 64;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    block_id INTEGER PRIMARY KEY,
    block_hash TEXT NOT NULL UNIQUE,
    space INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    span_left INTEGER NOT NULL,
    span_right INTEGER NOT NULL,
    version INTEGER NOT NULL,
    prev_block_hash TEXT NOT NULL,
    prev_block_id INTEGER,
    merkle TEXT NOT NULL,
    when_created INTEGER NOT NULL,
    bits_head INTEGER NOT NULL,
    bits_body INTEGER NOT NULL,
    nonce INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('orphan', 'valid'))
);
CREATE INDEX IF NOT EXISTS idx_blocks_forest
    ON blocks (space, depth, span_left, span_right);
CREATE INDEX IF NOT EXISTS idx_blocks_prev_hash ON blocks (prev_block_hash);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id INTEGER PRIMARY KEY,
    transaction_hash TEXT NOT NULL UNIQUE,
    version INTEGER NOT NULL,
    locktime INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions_parents (
    block_id INTEGER NOT NULL,
    transaction_id INTEGER NOT NULL,
    index_in_block INTEGER NOT NULL,
    PRIMARY KEY (block_id, index_in_block)
);
CREATE INDEX IF NOT EXISTS idx_parents_transaction
    ON transactions_parents (transaction_id);

CREATE TABLE IF NOT EXISTS scripts (
    script_id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS operations (
    script_id INTEGER NOT NULL,
    operation_id INTEGER NOT NULL,
    opcode TEXT NOT NULL,
    data TEXT,
    PRIMARY KEY (script_id, operation_id)
);

CREATE TABLE IF NOT EXISTS inputs (
    input_id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    index_in_parent INTEGER NOT NULL,
    script_id INTEGER NOT NULL,
    previous_output_hash TEXT NOT NULL,
    previous_output_index INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    UNIQUE (transaction_id, index_in_parent)
);
CREATE INDEX IF NOT EXISTS idx_inputs_previous
    ON inputs (previous_output_hash, previous_output_index);

CREATE TABLE IF NOT EXISTS outputs (
    output_id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    index_in_parent INTEGER NOT NULL,
    script_id INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (transaction_id, index_in_parent)
);

-- chain_id is rewritten wholesale during grafts; a UNIQUE constraint would
-- trip on the transient collisions inside a single UPDATE.
CREATE TABLE IF NOT EXISTS chains (
    chain_id INTEGER NOT NULL,
    work REAL NOT NULL,
    depth INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chains_id ON chains (chain_id);
";

/// Owns the SQLite connection for one chain store.
pub struct ChainSession {
    conn: Connection,
}

impl ChainSession {
    /// Open or create a chain database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::init(conn)
    }

    /// Open an in-memory chain database. Used by tests and tooling.
    pub fn open_in_memory() -> Result<Self, ChainError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ChainError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        register_functions(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// The underlying connection. Components borrow this for their queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn register_functions(conn: &Connection) -> Result<(), ChainError> {
    conn.create_scalar_function(
        "difficulty",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let bits_head = ctx.get::<i64>(0)? as u32;
            let bits_body = ctx.get::<i64>(1)? as u32;
            Ok(difficulty::work(bits_head, bits_body))
        },
    )?;
    conn.create_scalar_function(
        "sql_to_internal",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text = ctx.get::<String>(0)?;
            decimal_to_satoshi(&text).ok_or_else(|| {
                rusqlite::Error::UserFunctionError(
                    format!("not a money value: {text}").into(),
                )
            })
        },
    )?;
    Ok(())
}

/// Parse the decimal money representation into integer satoshi.
///
/// Accepts a plain integer coin count or up to eight fractional digits.
pub fn decimal_to_satoshi(text: &str) -> Option<i64> {
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() || frac.len() > 8 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let coins: i64 = whole.parse().ok()?;
    let satoshi = if frac.is_empty() {
        0
    } else {
        let scale = 10i64.pow(8 - frac.len() as u32);
        let digits: i64 = frac.parse().ok()?;
        digits.checked_mul(scale)?
    };
    coins.checked_mul(COIN as i64)?.checked_add(satoshi)
}

/// Format integer satoshi as the decimal money representation.
pub fn satoshi_to_decimal(value: u64) -> String {
    format!("{}.{:08}", value / COIN, value % COIN)
}
