//! Consensus dialect: the policy seam between the chain store and a
//! concrete ruleset.
//!
//! The store knows how to ask its branch-local questions (previous bits,
//! elapsed timespan, median time past) but the answers are judged against a
//! [`Dialect`]: script execution and the consensus constants both live behind
//! this trait so alternative rulesets plug in without touching the store.
//! The constant accessors default to the mainnet values in
//! [`constants`](crate::constants).

use crate::constants::{
    COINBASE_MATURITY, MAX_MONEY, POW_LIMIT_BITS, RETARGET_INTERVAL, RETARGET_TIMESPAN,
};
use crate::script::Script;
use crate::types::Transaction;

/// Policy object supplying opcode behavior and retarget constants.
pub trait Dialect: Send + Sync {
    /// Execute `output_script` against `input_script` for the given input.
    ///
    /// Returns `true` when the spend is authorized. The interpreter is
    /// supplied by the embedder; the store treats this as a pure function.
    fn run_script(
        &self,
        output_script: &Script,
        input_script: &Script,
        tx: &Transaction,
        input_index: usize,
    ) -> bool;

    /// Confirmations before a coinbase output may be spent.
    fn coinbase_maturity(&self) -> u64 {
        COINBASE_MATURITY
    }

    /// Upper bound on any single value and on summed input value.
    fn max_money(&self) -> u64 {
        MAX_MONEY
    }

    /// Blocks between difficulty retargets.
    fn retarget_interval(&self) -> u64 {
        RETARGET_INTERVAL
    }

    /// Ideal elapsed seconds across one retarget interval.
    fn retarget_timespan(&self) -> u64 {
        RETARGET_TIMESPAN
    }

    /// Easiest allowed target in compact form.
    fn proof_of_work_limit(&self) -> u32 {
        POW_LIMIT_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A dialect that authorizes every spend.
    struct OpenDialect;

    impl Dialect for OpenDialect {
        fn run_script(&self, _: &Script, _: &Script, _: &Transaction, _: usize) -> bool {
            true
        }
    }

    #[test]
    fn default_constants_match_mainnet() {
        let dialect = OpenDialect;
        assert_eq!(dialect.coinbase_maturity(), COINBASE_MATURITY);
        assert_eq!(dialect.max_money(), MAX_MONEY);
        assert_eq!(dialect.retarget_interval(), RETARGET_INTERVAL);
        assert_eq!(dialect.retarget_timespan(), RETARGET_TIMESPAN);
        assert_eq!(dialect.proof_of_work_limit(), POW_LIMIT_BITS);
    }

    #[test]
    fn dialect_is_object_safe() {
        let dialect: Box<dyn Dialect> = Box::new(OpenDialect);
        let tx = Transaction { version: 1, locktime: 0, inputs: vec![], outputs: vec![] };
        assert!(dialect.run_script(&Script::new(), &Script::new(), &tx, 0));
    }
}
