//! Promote orphan blocks in the main tree to `valid`.
//!
//! Candidates are scanned in ascending depth so every ancestor-dependent
//! query sees an already-settled parent. All branch-local questions are
//! interval containment: a block's ancestors are exactly the space-0 rows
//! whose `[span_left, span_right]` contains its own interval.
//!
//! A consensus rejection prunes the offending block's branch and restarts
//! the scan (the prune shifted every coordinate the scan had cached); a
//! store fault aborts the run.

use primitive_types::U256;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use arbor_core::dialect::Dialect;
use arbor_core::difficulty::{compact_to_target, join_bits, split_bits, target_to_compact};
use arbor_core::error::ValidateError;
use arbor_core::types::{Block, Transaction, TxInput};

use crate::error::ChainError;
use crate::organizer::Organizer;
use crate::reader::{BlockInfo, Reader};

/// Walks space-0 orphans in depth order and promotes the ones that pass.
pub struct Validator<'c> {
    conn: &'c Connection,
    dialect: &'c dyn Dialect,
}

impl<'c> Validator<'c> {
    pub fn new(conn: &'c Connection, dialect: &'c dyn Dialect) -> Self {
        Self { conn, dialect }
    }

    /// Run one validation pass. Returns the number of promoted blocks.
    pub fn validate(&self) -> Result<usize, ChainError> {
        let mut promoted = 0;
        'scan: loop {
            let pending = self.pending_blocks()?;
            if pending.is_empty() {
                break;
            }
            for info in pending {
                let block = Reader::new(self.conn).read_block(info.block_id)?;
                let check = BlockCheck::new(self.conn, self.dialect, info, &block);
                match check.validates() {
                    Ok(()) => {
                        self.finalize_status(&info, &block)?;
                        promoted += 1;
                        info!(block_id = info.block_id, depth = info.depth, "block valid");
                    }
                    Err(ChainError::Consensus(reason)) => {
                        warn!(
                            block_id = info.block_id,
                            %reason,
                            "block failed validation, pruning branch"
                        );
                        Organizer::new(self.conn).delete_branch(
                            0,
                            info.depth,
                            info.span_left,
                            info.span_right,
                        )?;
                        // Remaining candidates hold pre-prune coordinates.
                        continue 'scan;
                    }
                    Err(fatal) => return Err(fatal),
                }
            }
            break;
        }
        Ok(promoted)
    }

    fn pending_blocks(&self) -> Result<Vec<BlockInfo>, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT block_id, depth, span_left, span_right, prev_block_id
             FROM blocks
             WHERE status = 'orphan' AND space = 0
             ORDER BY depth ASC, span_left ASC",
        )?;
        let infos = stmt
            .query_map([], |row| {
                Ok(BlockInfo {
                    block_id: row.get(0)?,
                    depth: row.get(1)?,
                    span_left: row.get(2)?,
                    span_right: row.get(3)?,
                    prev_block_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for info in &infos {
            if info.prev_block_id.is_none() {
                return Err(ChainError::Corrupt(format!(
                    "orphan block {} in the main tree has no parent link",
                    info.block_id
                )));
            }
        }
        Ok(infos)
    }

    /// Credit the block's work to every chain under it and mark it valid.
    /// Both statements commit together.
    fn finalize_status(&self, info: &BlockInfo, block: &Block) -> Result<(), ChainError> {
        let (bits_head, bits_body) = split_bits(block.header.bits);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE chains SET
                work = work + difficulty(?1, ?2),
                depth = ?3
             WHERE chain_id >= ?4 AND chain_id <= ?5",
            params![bits_head, bits_body, info.depth, info.span_left, info.span_right],
        )?;
        tx.execute(
            "UPDATE blocks SET status = 'valid' WHERE block_id = ?1",
            [info.block_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Consensus check context for one candidate block, bound to its forest
/// coordinates.
pub struct BlockCheck<'c> {
    conn: &'c Connection,
    dialect: &'c dyn Dialect,
    info: BlockInfo,
    block: &'c Block,
}

impl<'c> BlockCheck<'c> {
    pub fn new(
        conn: &'c Connection,
        dialect: &'c dyn Dialect,
        info: BlockInfo,
        block: &'c Block,
    ) -> Self {
        Self { conn, dialect, info, block }
    }

    /// Run the full consensus check battery.
    pub fn validates(&self) -> Result<(), ChainError> {
        let expected = self.work_required()?;
        if self.block.header.bits != expected {
            return Err(ValidateError::IncorrectBits {
                got: self.block.header.bits,
                expected,
            }
            .into());
        }

        if self.info.depth > 0 {
            let median = self.median_time_past()?;
            let timestamp = self.block.header.timestamp as u64;
            if timestamp <= median {
                return Err(ValidateError::TimestampTooEarly { timestamp, median }.into());
            }
        }

        for (index, transaction) in self.block.transactions.iter().enumerate() {
            if index == 0 {
                if !transaction.is_coinbase() {
                    return Err(ValidateError::FirstNotCoinbase.into());
                }
                continue;
            }
            if transaction.is_coinbase() {
                return Err(ValidateError::ExtraCoinbase(index).into());
            }
            let mut value_in = 0u64;
            self.validate_transaction(transaction, index, &mut value_in)?;
        }
        Ok(())
    }

    /// Compact bits this block must carry: the parent's bits off retarget
    /// boundaries, the retarget computation on them.
    pub fn work_required(&self) -> Result<u32, ChainError> {
        if self.info.depth == 0 {
            return Ok(self.dialect.proof_of_work_limit());
        }
        let interval = self.dialect.retarget_interval();
        if self.info.depth as u64 % interval != 0 {
            return self.previous_block_bits();
        }

        let previous_bits = self.previous_block_bits()?;
        let timespan = self.actual_timespan(interval)?;
        let ideal = self.dialect.retarget_timespan();
        let clamped = timespan.clamp(ideal / 4, ideal * 4);

        let mut target =
            compact_to_target(previous_bits) * U256::from(clamped) / U256::from(ideal);
        let limit = compact_to_target(self.dialect.proof_of_work_limit());
        if target > limit {
            target = limit;
        }
        Ok(target_to_compact(target))
    }

    /// Compact bits of the unique block one generation up on this branch.
    pub fn previous_block_bits(&self) -> Result<u32, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT bits_head, bits_body FROM blocks
             WHERE space = 0 AND depth = ?1 - 1
               AND span_left <= ?2 AND span_right >= ?3",
        )?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map(
                params![self.info.depth, self.info.span_left, self.info.span_right],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<_, _>>()?;
        match rows.as_slice() {
            [(bits_head, bits_body)] => Ok(join_bits(*bits_head as u32, *bits_body as u32)),
            _ => Err(ChainError::Corrupt(format!(
                "expected one previous block for block {}, found {}",
                self.info.block_id,
                rows.len()
            ))),
        }
    }

    /// Seconds elapsed between the branch blocks at `depth - interval` and
    /// `depth - 1`. Feeds the retarget computation.
    pub fn actual_timespan(&self, interval: u64) -> Result<u64, ChainError> {
        if (self.info.depth as u64) < interval {
            return Err(ChainError::Corrupt(format!(
                "timespan over {interval} blocks requested at depth {}",
                self.info.depth
            )));
        }
        let begin_depth = self.info.depth - interval as i64;
        let end_depth = self.info.depth - 1;
        let mut stmt = self.conn.prepare_cached(
            "SELECT end_block.when_created - start_block.when_created
             FROM blocks AS start_block, blocks AS end_block
             WHERE start_block.space = 0
               AND start_block.depth = ?1
               AND start_block.span_left <= ?3 AND start_block.span_right >= ?4
               AND end_block.space = 0
               AND end_block.depth = ?2
               AND end_block.span_left <= ?3 AND end_block.span_right >= ?4",
        )?;
        let elapsed: i64 = stmt
            .query_row(
                params![begin_depth, end_depth, self.info.span_left, self.info.span_right],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                ChainError::Corrupt(format!(
                    "missing retarget boundary blocks for block {}",
                    self.info.block_id
                ))
            })?;
        Ok(elapsed.max(0) as u64)
    }

    /// Median of the prior (up to) eleven block timestamps on this branch.
    pub fn median_time_past(&self) -> Result<u64, ChainError> {
        if self.info.depth == 0 {
            return Err(ChainError::Corrupt(
                "median time past requested for a root block".into(),
            ));
        }
        let median_offset = if self.info.depth < 11 { self.info.depth / 2 } else { 5 };
        let mut stmt = self.conn.prepare_cached(
            "SELECT when_created FROM blocks
             WHERE space = 0
               AND depth < ?1 AND depth >= ?1 - 11
               AND span_left <= ?2 AND span_right >= ?3
             ORDER BY when_created ASC
             LIMIT 1 OFFSET ?4",
        )?;
        let median: i64 = stmt
            .query_row(
                params![self.info.depth, self.info.span_left, self.info.span_right, median_offset],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                ChainError::Corrupt(format!(
                    "median time past missing for block {}",
                    self.info.block_id
                ))
            })?;
        Ok(median as u64)
    }

    /// Connect every input of a non-coinbase transaction.
    pub fn validate_transaction(
        &self,
        transaction: &Transaction,
        index_in_block: usize,
        value_in: &mut u64,
    ) -> Result<(), ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT transaction_id FROM transactions_parents
             WHERE block_id = ?1 AND index_in_block = ?2",
        )?;
        let transaction_id: i64 = stmt
            .query_row(params![self.info.block_id, index_in_block as i64], |row| row.get(0))
            .optional()?
            .ok_or_else(|| {
                ChainError::Corrupt(format!(
                    "transaction {index_in_block} of block {} not linked",
                    self.info.block_id
                ))
            })?;

        for input_index in 0..transaction.inputs.len() {
            self.connect_input(transaction_id, transaction, input_index, value_in)?;
        }
        Ok(())
    }

    /// Resolve one input against its previous output and judge the spend.
    pub fn connect_input(
        &self,
        transaction_id: i64,
        transaction: &Transaction,
        input_index: usize,
        value_in: &mut u64,
    ) -> Result<(), ChainError> {
        let input = &transaction.inputs[input_index];
        let unknown = || ValidateError::UnknownPreviousOutput {
            hash: input.previous_output_hash.to_string(),
            index: input.previous_output_index,
        };

        let mut find_tx = self.conn.prepare_cached(
            "SELECT transaction_id FROM transactions WHERE transaction_hash = ?1",
        )?;
        let previous_tx_id: i64 = find_tx
            .query_row([input.previous_output_hash.to_string()], |row| row.get(0))
            .optional()?
            .ok_or_else(|| ChainError::from(unknown()))?;

        let mut find_output = self.conn.prepare_cached(
            "SELECT script_id, sql_to_internal(value) FROM outputs
             WHERE transaction_id = ?1 AND index_in_parent = ?2",
        )?;
        let output: Option<(i64, i64)> = find_output
            .query_row(params![previous_tx_id, input.previous_output_index], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let (script_id, output_value) = output.ok_or_else(|| ChainError::from(unknown()))?;
        let output_value = output_value as u64;

        if output_value > self.dialect.max_money() {
            return Err(ValidateError::OutputTooLarge.into());
        }

        if self.is_coinbase_transaction(previous_tx_id)? {
            let previous_depth = self.previous_block_depth(previous_tx_id)?;
            let depth_difference = (self.info.depth - previous_depth).max(0) as u64;
            if depth_difference < self.dialect.coinbase_maturity() {
                return Err(ValidateError::ImmatureCoinbase { depth_difference }.into());
            }
        }

        let output_script = Reader::new(self.conn).select_script(script_id)?;
        if !self
            .dialect
            .run_script(&output_script, &input.script, transaction, input_index)
        {
            return Err(ValidateError::ScriptFailed { input_index }.into());
        }

        if self.search_double_spends(transaction_id, input, input_index)? {
            return Err(ValidateError::DoubleSpend {
                hash: input.previous_output_hash.to_string(),
                index: input.previous_output_index,
            }
            .into());
        }

        *value_in = value_in
            .checked_add(output_value)
            .ok_or(ValidateError::InputSumTooLarge)?;
        if *value_in > self.dialect.max_money() {
            return Err(ValidateError::InputSumTooLarge.into());
        }
        Ok(())
    }

    /// Whether a stored transaction is a coinbase, judged from its inputs.
    pub fn is_coinbase_transaction(&self, tx_id: i64) -> Result<bool, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT previous_output_hash, previous_output_index
             FROM inputs WHERE transaction_id = ?1
             ORDER BY index_in_parent ASC",
        )?;
        let previous: Vec<(String, i64)> = stmt
            .query_map([tx_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        let [(hash, index)] = previous.as_slice() else {
            return Ok(false);
        };
        Ok(*index == u32::MAX as i64 && hash.bytes().all(|b| b == b'0'))
    }

    /// Depth of the branch block holding a previous transaction.
    pub fn previous_block_depth(&self, previous_tx_id: i64) -> Result<i64, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT depth
             FROM transactions_parents
             JOIN blocks ON transactions_parents.block_id = blocks.block_id
             WHERE transaction_id = ?1
               AND space = 0
               AND span_left <= ?2 AND span_right >= ?3",
        )?;
        let depths: Vec<i64> = stmt
            .query_map(
                params![previous_tx_id, self.info.span_left, self.info.span_right],
                |row| row.get(0),
            )?
            .collect::<Result<_, _>>()?;
        match depths.as_slice() {
            [depth] => Ok(*depth),
            _ => Err(ChainError::Corrupt(format!(
                "transaction {previous_tx_id} appears in {} branch blocks",
                depths.len()
            ))),
        }
    }

    /// Whether another input on this branch already spends the same
    /// previous output.
    ///
    /// Conflicts confined to other branches are competing histories, not
    /// double spends: only inputs whose containing block is an ancestor of
    /// (or equal to) the block under validation count.
    pub fn search_double_spends(
        &self,
        transaction_id: i64,
        input: &TxInput,
        input_index: usize,
    ) -> Result<bool, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT 1
             FROM inputs
             JOIN transactions_parents
               ON transactions_parents.transaction_id = inputs.transaction_id
             JOIN blocks ON blocks.block_id = transactions_parents.block_id
             WHERE inputs.previous_output_hash = ?1
               AND inputs.previous_output_index = ?2
               AND (inputs.transaction_id != ?3 OR inputs.index_in_parent != ?4)
               AND blocks.space = 0
               AND blocks.span_left <= ?5
               AND blocks.span_right >= ?6
             LIMIT 1",
        )?;
        let conflict = stmt
            .query_row(
                params![
                    input.previous_output_hash.to_string(),
                    input.previous_output_index,
                    transaction_id,
                    input_index as i64,
                    self.info.span_left,
                    self.info.span_right,
                ],
                |_| Ok(()),
            )
            .optional()?;
        Ok(conflict.is_some())
    }
}
