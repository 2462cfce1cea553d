//! Tick Store - Partitioned Binary Tick Log
//!
//! Durable append-only write path for tick data at microsecond resolution
//! and a range-query read path for backtest replay.
//!
//! ## On-disk layout
//!
//! One directory per symbol, one partition per day:
//!
//! ```text
//! <root>/<symbol>/<YYYYMMDD>.ticks    fixed 25-byte trade records
//! <root>/<symbol>/<YYYYMMDD>.quotes   fixed 40-byte quote records
//! <root>/<symbol>/<YYYYMMDD>.book     variable book-snapshot records
//! ```
//!
//! All records are little-endian. Writers append whole records only, so a
//! crash can leave at most one torn record at end-of-file, which is
//! truncated on the next open. Partitions older than a configurable
//! threshold are replaced by gzip siblings (`.gz` suffix); reads decompress
//! transparently.

pub mod codec;
pub mod ohlcv;
pub mod store;

pub use codec::{BookLevelRecord, BookRecord, DataType, QuoteRecord, TickData, TradeRecord};
pub use ohlcv::{aggregate_ohlcv, parse_interval, OhlcvBar};
pub use store::TickStore;
