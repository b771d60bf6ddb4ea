//! Error type for the chain store.
use thiserror::Error;

use arbor_core::error::ValidateError;

/// Faults and verdicts surfaced by the chain store.
///
/// `Consensus` carries a per-block verdict: the offending branch is pruned
/// and processing continues. Every other variant is fatal to the current
/// organize/validate run.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("sql: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt chain store: {0}")]
    Corrupt(String),
    #[error("consensus: {0}")]
    Consensus(#[from] ValidateError),
    #[error("store already holds a genesis block")]
    AlreadyInitialized,
    #[error("duplicate block: {0}")]
    DuplicateBlock(String),
    #[error("worker thread: {0}")]
    Worker(String),
}
