//! Synchronous chain engine: session plus organizer, validator, and the
//! ingest write path, driven directly.
//!
//! [`Chain`] is the single-worker engine; [`Blockchain`](crate::Blockchain)
//! wraps one in a thread behind the debouncing barrier. Components share
//! the session by borrowing its connection; composition replaces the
//! inheritance diamond of the classic design.

use std::sync::Arc;

use arbor_core::dialect::Dialect;
use arbor_core::types::Block;

use crate::error::ChainError;
use crate::ingest;
use crate::organizer::Organizer;
use crate::session::ChainSession;
use crate::validator::Validator;

/// The persistence engine: owns the SQL session and the consensus policy.
pub struct Chain {
    session: ChainSession,
    dialect: Arc<dyn Dialect>,
}

impl Chain {
    pub fn new(session: ChainSession, dialect: Arc<dyn Dialect>) -> Self {
        Self { session, dialect }
    }

    /// The underlying session, for readers and ingestion sharing this
    /// connection.
    pub fn session(&self) -> &ChainSession {
        &self.session
    }

    /// Seed the main tree with the genesis block.
    pub fn store_genesis(&self, block: &Block) -> Result<i64, ChainError> {
        ingest::store_genesis(self.session.connection(), block)
    }

    /// Store a parsed block as a fresh orphan space root.
    pub fn store_block(&self, block: &Block) -> Result<i64, ChainError> {
        ingest::store_block(self.session.connection(), block)
    }

    /// Graft every orphan space whose parent is now known.
    pub fn organize(&self) -> Result<usize, ChainError> {
        Organizer::new(self.session.connection()).organize()
    }

    /// Promote passing space-0 orphans to `valid`.
    pub fn validate(&self) -> Result<usize, ChainError> {
        Validator::new(self.session.connection(), self.dialect.as_ref()).validate()
    }

    /// One full cycle: organize, then validate.
    pub fn run_once(&self) -> Result<(), ChainError> {
        self.organize()?;
        self.validate()?;
        Ok(())
    }
}
