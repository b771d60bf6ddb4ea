//! Barrier-driven front object: a [`Chain`] worker behind a debouncing
//! barrier.
//!
//! Ingestion (which writes through its own session) calls
//! [`Blockchain::raise_barrier`] after each insert; the worker thread owns
//! the engine's session outright, so there is no lock around the SQL work
//! and no reference cycle into the timer. One cycle runs at startup to pick
//! up whatever the store already holds.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::error;

use crate::barrier::{Barrier, BarrierWait};
use crate::chain::Chain;
use crate::config::ChainConfig;
use crate::error::ChainError;

/// Owns the worker thread and the barrier releasing it.
pub struct Blockchain {
    barrier: Arc<Barrier>,
    worker: Option<JoinHandle<()>>,
}

impl Blockchain {
    /// Start the worker around an engine. Runs one initial cycle.
    pub fn start(chain: Chain, config: ChainConfig) -> Result<Self, ChainError> {
        let barrier = Arc::new(Barrier::new(config.clearance_level, config.barrier_timeout));
        let worker_barrier = Arc::clone(&barrier);
        let worker = std::thread::Builder::new()
            .name("arbor-chain".into())
            .spawn(move || {
                if let Err(e) = chain.run_once() {
                    error!("chain processing: {e}");
                }
                loop {
                    match worker_barrier.wait() {
                        BarrierWait::Run => {
                            if let Err(e) = chain.run_once() {
                                error!("chain processing: {e}");
                            }
                        }
                        BarrierWait::Shutdown => break,
                    }
                }
            })
            .map_err(|e| ChainError::Worker(e.to_string()))?;
        Ok(Self { barrier, worker: Some(worker) })
    }

    /// Record one block arrival; called by ingestion after each insert.
    pub fn raise_barrier(&self) {
        self.barrier.raise();
    }

    /// Stop the worker after any in-flight cycle completes.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.barrier.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        self.stop();
    }
}
