//! Consensus constants. All monetary values in satoshi (1 coin = 10^8 satoshi).

pub const COIN: u64 = 100_000_000;

/// Maximum amount of money in circulation, ever.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Blocks a coinbase output must wait before its outputs are spendable.
pub const COINBASE_MATURITY: u64 = 100;

/// Blocks between difficulty retargets.
pub const RETARGET_INTERVAL: u64 = 2016;

/// Ideal elapsed seconds across one retarget interval (two weeks).
pub const RETARGET_TIMESPAN: u64 = 14 * 24 * 60 * 60;

/// Target seconds between blocks.
pub const TARGET_SPACING: u64 = 10 * 60;

/// Number of prior blocks consulted for the median-time-past rule.
pub const MEDIAN_TIME_SPAN: u64 = 11;

/// Easiest allowed proof-of-work target in compact form.
pub const POW_LIMIT_BITS: u32 = 0x1d00_ffff;
