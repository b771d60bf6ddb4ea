//! Error types shared across the arbor crates.
use thiserror::Error;

/// Failures while decoding a script from its stored representation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("unknown opcode: {0}")] UnknownOpcode(String),
    #[error("push data too long: {0} bytes")] OversizedPush(usize),
    #[error("invalid hex data: {0}")] InvalidHex(String),
}

/// Consensus rejection reasons produced while connecting a block.
///
/// These are verdicts about the block, not faults of the store: a rejected
/// block leads to its branch being pruned, while store faults abort the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    #[error("incorrect bits: got {got:#010x}, expected {expected:#010x}")]
    IncorrectBits { got: u32, expected: u32 },
    #[error("timestamp {timestamp} not after median time past {median}")]
    TimestampTooEarly { timestamp: u64, median: u64 },
    #[error("first transaction is not a coinbase")] FirstNotCoinbase,
    #[error("unexpected coinbase at transaction index {0}")] ExtraCoinbase(usize),
    #[error("unknown previous output {hash}:{index}")]
    UnknownPreviousOutput { hash: String, index: u32 },
    #[error("previous output value exceeds money supply")] OutputTooLarge,
    #[error("summed input value exceeds money supply")] InputSumTooLarge,
    #[error("immature coinbase spend: {depth_difference} confirmations")]
    ImmatureCoinbase { depth_difference: u64 },
    #[error("script failed for input {input_index}")] ScriptFailed { input_index: usize },
    #[error("double spend of {hash}:{index}")] DoubleSpend { hash: String, index: u32 },
}
