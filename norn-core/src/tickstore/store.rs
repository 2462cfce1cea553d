use crate::core::StoreError;
use crate::tickstore::codec::{
    self, BookRecord, DataType, QuoteRecord, TickData, TradeRecord, QUOTE_RECORD_SIZE,
    TRADE_RECORD_SIZE,
};
use crate::tickstore::ohlcv::{aggregate_ohlcv, OhlcvBar};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Records buffered per partition before a flush
const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Partitions older than this many days are gzip-compressed
const DEFAULT_COMPRESS_AFTER_DAYS: i64 = 7;

/// Partitioned binary tick store.
///
/// Single writer per partition; concurrent readers are fine since
/// partitions are append-only and reads open their own handles.
pub struct TickStore {
    root: PathBuf,
    buffer_size: usize,
    /// (symbol, date, type) -> buffered ticks
    buffers: HashMap<(String, NaiveDate, DataType), Vec<TickData>>,
    buffered_count: usize,
}

impl TickStore {
    /// Open (creating if necessary) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffers: HashMap::new(),
            buffered_count: 0,
        })
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_date(timestamp_us: u64) -> NaiveDate {
        Utc.timestamp_micros(timestamp_us as i64)
            .single()
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
    }

    fn partition_path(&self, symbol: &str, date: NaiveDate, data_type: DataType) -> PathBuf {
        self.root
            .join(symbol)
            .join(format!("{}.{}", date.format("%Y%m%d"), data_type.extension()))
    }

    /// Buffer a single tick; flushes the partition once the global buffer
    /// threshold is reached.
    pub fn write_tick(&mut self, tick: TickData) -> Result<(), StoreError> {
        codec::validate_tick(&tick)?;
        let key = (
            tick.symbol.clone(),
            Self::partition_date(tick.timestamp_us),
            tick.data_type,
        );
        self.buffers.entry(key).or_default().push(tick);
        self.buffered_count += 1;
        if self.buffered_count >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Buffer a batch of ticks, grouped by symbol and day
    pub fn write_ticks_batch(&mut self, ticks: Vec<TickData>) -> Result<(), StoreError> {
        for tick in ticks {
            self.write_tick(tick)?;
        }
        Ok(())
    }

    /// Append all buffered records to their partitions.
    ///
    /// Each partition write is a single `write_all` of whole records, so a
    /// crash can tear at most the final record, which `open_for_append`
    /// trims on the next open.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let buffers = std::mem::take(&mut self.buffers);
        self.buffered_count = 0;
        for ((symbol, date, data_type), mut ticks) in buffers {
            if ticks.is_empty() {
                continue;
            }
            ticks.sort_by_key(|t| t.timestamp_us);
            let path = self.partition_path(&symbol, date, data_type);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut bytes = Vec::new();
            for tick in &ticks {
                match data_type {
                    DataType::Trade => {
                        let rec = TradeRecord::from_tick(tick).ok_or_else(|| StoreError::Corrupt {
                            path: path.display().to_string(),
                            reason: "trade tick missing fields".into(),
                        })?;
                        bytes.extend_from_slice(&rec.encode());
                    }
                    DataType::Quote => {
                        let rec = QuoteRecord::from_tick(tick).ok_or_else(|| StoreError::Corrupt {
                            path: path.display().to_string(),
                            reason: "quote tick missing fields".into(),
                        })?;
                        bytes.extend_from_slice(&rec.encode());
                    }
                    DataType::OrderBook => {
                        let mut rec = tick.book.clone().ok_or_else(|| StoreError::Corrupt {
                            path: path.display().to_string(),
                            reason: "book tick missing levels".into(),
                        })?;
                        rec.timestamp_us = tick.timestamp_us;
                        bytes.extend_from_slice(&rec.encode());
                    }
                }
            }
            let mut file = Self::open_for_append(&path, data_type)?;
            file.write_all(&bytes)?;
            file.sync_data()?;
            debug!(path = %path.display(), records = ticks.len(), "flushed partition");
        }
        Ok(())
    }

    /// Open a partition for appending, truncating a torn trailing record
    /// left by a crash (fixed-width partitions only).
    fn open_for_append(path: &Path, data_type: DataType) -> Result<File, StoreError> {
        let record_size = match data_type {
            DataType::Trade => Some(TRADE_RECORD_SIZE as u64),
            DataType::Quote => Some(QUOTE_RECORD_SIZE as u64),
            DataType::OrderBook => None,
        };
        if let (Some(record_size), Ok(meta)) = (record_size, fs::metadata(path)) {
            let torn = meta.len() % record_size;
            if torn != 0 {
                warn!(
                    path = %path.display(),
                    bytes = torn,
                    "truncating torn trailing record"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(meta.len() - torn)?;
            }
        }
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Read a partition, transparently decompressing a `.gz` sibling when
    /// the plain file is gone.
    fn read_partition_bytes(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        if path.exists() {
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
        let gz_path = PathBuf::from(format!("{}.gz", path.display()));
        if gz_path.exists() {
            let mut buf = Vec::new();
            GzDecoder::new(File::open(&gz_path)?).read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
        Ok(None)
    }

    fn read_partition(
        path: &Path,
        symbol: &str,
        data_type: DataType,
    ) -> Result<Vec<TickData>, StoreError> {
        let Some(bytes) = Self::read_partition_bytes(path)? else {
            return Ok(Vec::new());
        };
        let mut ticks = Vec::new();
        match data_type {
            DataType::Trade => {
                for chunk in bytes.chunks_exact(TRADE_RECORD_SIZE) {
                    let rec = TradeRecord::decode(chunk.try_into().unwrap());
                    ticks.push(rec.into_tick(symbol));
                }
            }
            DataType::Quote => {
                for chunk in bytes.chunks_exact(QUOTE_RECORD_SIZE) {
                    let rec = QuoteRecord::decode(chunk.try_into().unwrap());
                    ticks.push(rec.into_tick(symbol));
                }
            }
            DataType::OrderBook => {
                let mut offset = 0;
                while offset < bytes.len() {
                    match BookRecord::decode(&bytes[offset..]) {
                        Some((rec, consumed)) => {
                            ticks.push(rec.into_tick(symbol));
                            offset += consumed;
                        }
                        // Torn tail from a crashed writer; ignore it
                        None => break,
                    }
                }
            }
        }
        Ok(ticks)
    }

    /// Query ticks in `[start, end]` (inclusive, microseconds) in timestamp
    /// order, optionally filtered to one data type.
    pub fn query_ticks(
        &mut self,
        symbol: &str,
        start_us: u64,
        end_us: u64,
        data_type: Option<DataType>,
    ) -> Result<Vec<TickData>, StoreError> {
        // Buffered writes must land first so reads see them
        self.flush()?;

        let types: &[DataType] = match data_type {
            Some(DataType::Trade) => &[DataType::Trade],
            Some(DataType::Quote) => &[DataType::Quote],
            Some(DataType::OrderBook) => &[DataType::OrderBook],
            None => &[DataType::Trade, DataType::Quote, DataType::OrderBook],
        };

        let mut out = Vec::new();
        let start_date = Self::partition_date(start_us);
        let end_date = Self::partition_date(end_us);
        let mut date = start_date;
        while date <= end_date {
            for &dt in types {
                let path = self.partition_path(symbol, date, dt);
                let ticks = Self::read_partition(&path, symbol, dt)?;
                out.extend(
                    ticks
                        .into_iter()
                        .filter(|t| t.timestamp_us >= start_us && t.timestamp_us <= end_us),
                );
            }
            date += Duration::days(1);
        }
        // Stable by timestamp: equal-timestamp ticks keep partition order
        out.sort_by_key(|t| t.timestamp_us);
        Ok(out)
    }

    /// Most recent tick of the given type, scanning the newest partition
    /// backwards.
    pub fn latest_tick(
        &mut self,
        symbol: &str,
        data_type: DataType,
    ) -> Result<Option<TickData>, StoreError> {
        self.flush()?;
        let dir = self.root.join(symbol);
        if !dir.exists() {
            return Ok(None);
        }
        let suffix = format!(".{}", data_type.extension());
        let gz_suffix = format!("{}.gz", suffix);
        let mut partitions: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(&suffix) || name.ends_with(&gz_suffix)
            })
            .collect();
        partitions.sort();
        for path in partitions.iter().rev() {
            // Strip a .gz suffix so read_partition resolves either form
            let plain = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                path.with_extension("")
            } else {
                path.clone()
            };
            let ticks = Self::read_partition(&plain, symbol, data_type)?;
            if let Some(last) = ticks.into_iter().max_by_key(|t| t.timestamp_us) {
                return Ok(Some(last));
            }
        }
        Ok(None)
    }

    /// Aggregate trade ticks into OHLCV bars. `interval` uses the grammar
    /// `<n><s|m|h|d>`, e.g. "5s", "1m", "4h", "1d".
    pub fn query_ohlcv(
        &mut self,
        symbol: &str,
        start_us: u64,
        end_us: u64,
        interval: &str,
    ) -> Result<Vec<OhlcvBar>, StoreError> {
        let ticks = self.query_ticks(symbol, start_us, end_us, Some(DataType::Trade))?;
        aggregate_ohlcv(symbol, &ticks, interval)
    }

    /// Replace partitions older than `days` (relative to `now`) with gzip
    /// siblings. Returns the number of partitions compressed.
    pub fn compress_older_than(
        &mut self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.flush()?;
        let cutoff = now.date_naive() - Duration::days(days);
        let mut compressed = 0;

        for symbol_entry in fs::read_dir(&self.root)? {
            let symbol_dir = symbol_entry?.path();
            if !symbol_dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&symbol_dir)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.ends_with(".gz") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Ok(date) = NaiveDate::parse_from_str(stem, "%Y%m%d") else {
                    continue;
                };
                if date >= cutoff {
                    continue;
                }
                let gz_path = PathBuf::from(format!("{}.gz", path.display()));
                if gz_path.exists() {
                    continue;
                }
                let mut input = Vec::new();
                File::open(&path)?.read_to_end(&mut input)?;
                let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::default());
                encoder.write_all(&input)?;
                encoder.finish()?;
                fs::remove_file(&path)?;
                compressed += 1;
                info!(path = %path.display(), "compressed aged partition");
            }
        }
        Ok(compressed)
    }

    /// Apply the default 7-day compression policy
    pub fn compress_aged(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.compress_older_than(DEFAULT_COMPRESS_AFTER_DAYS, now)
    }

    /// Per-symbol partition counts and byte totals
    pub fn storage_stats(&self) -> Result<Vec<(String, usize, u64)>, StoreError> {
        let mut stats = Vec::new();
        if !self.root.exists() {
            return Ok(stats);
        }
        for symbol_entry in fs::read_dir(&self.root)? {
            let symbol_dir = symbol_entry?.path();
            if !symbol_dir.is_dir() {
                continue;
            }
            let symbol = symbol_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();
            let mut files = 0usize;
            let mut bytes = 0u64;
            for entry in fs::read_dir(&symbol_dir)? {
                let meta = entry?.metadata()?;
                if meta.is_file() {
                    files += 1;
                    bytes += meta.len();
                }
            }
            stats.push((symbol, files, bytes));
        }
        stats.sort();
        Ok(stats)
    }
}

impl Drop for TickStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("tick store flush on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;
    use crate::tickstore::codec::BookLevelRecord;

    fn us(date: &str, offset_us: u64) -> u64 {
        let day = NaiveDate::parse_from_str(date, "%Y%m%d").unwrap();
        let base = Utc
            .from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
            .timestamp_micros() as u64;
        base + offset_us
    }

    #[test]
    fn test_write_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();

        let t0 = us("20240115", 1_000_000);
        store
            .write_tick(TickData::trade("AAPL", t0, 150.0, 100.0, Side::Buy))
            .unwrap();
        store
            .write_tick(TickData::trade("AAPL", t0 + 500, 150.25, 50.0, Side::Sell))
            .unwrap();
        // Different symbol lands in its own partition
        store
            .write_tick(TickData::trade("MSFT", t0, 390.0, 10.0, Side::Buy))
            .unwrap();

        let ticks = store
            .query_ticks("AAPL", t0, t0 + 1_000, Some(DataType::Trade))
            .unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].trade_price, Some(150.0));
        assert_eq!(ticks[1].trade_side, Some(Side::Sell));
        assert!(ticks[0].timestamp_us <= ticks[1].timestamp_us);
    }

    #[test]
    fn test_query_spans_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let day1 = us("20240115", 0);
        let day2 = us("20240116", 0);
        store
            .write_tick(TickData::trade("AAPL", day1 + 10, 150.0, 1.0, Side::Buy))
            .unwrap();
        store
            .write_tick(TickData::trade("AAPL", day2 + 10, 151.0, 1.0, Side::Buy))
            .unwrap();

        let ticks = store
            .query_ticks("AAPL", day1, day2 + 100, Some(DataType::Trade))
            .unwrap();
        assert_eq!(ticks.len(), 2);
        // Time-range filter trims within partitions
        let ticks = store
            .query_ticks("AAPL", day2, day2 + 100, Some(DataType::Trade))
            .unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].trade_price, Some(151.0));
    }

    #[test]
    fn test_mixed_types_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let t0 = us("20240115", 0);
        store
            .write_tick(TickData::quote("AAPL", t0 + 1, 149.9, 10.0, 150.1, 20.0))
            .unwrap();
        store
            .write_tick(TickData::trade("AAPL", t0 + 2, 150.0, 5.0, Side::Buy))
            .unwrap();
        store
            .write_tick(TickData::quote("AAPL", t0 + 3, 149.95, 10.0, 150.15, 20.0))
            .unwrap();

        let all = store.query_ticks("AAPL", t0, t0 + 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].data_type, DataType::Quote);
        assert_eq!(all[1].data_type, DataType::Trade);
        assert_eq!(all[2].data_type, DataType::Quote);
    }

    #[test]
    fn test_latest_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let day1 = us("20240115", 0);
        let day2 = us("20240116", 0);
        store
            .write_tick(TickData::trade("AAPL", day1, 150.0, 1.0, Side::Buy))
            .unwrap();
        store
            .write_tick(TickData::trade("AAPL", day2 + 99, 152.0, 1.0, Side::Sell))
            .unwrap();
        store
            .write_tick(TickData::trade("AAPL", day2 + 50, 151.0, 1.0, Side::Buy))
            .unwrap();

        let latest = store.latest_tick("AAPL", DataType::Trade).unwrap().unwrap();
        assert_eq!(latest.timestamp_us, day2 + 99);
        assert_eq!(latest.trade_price, Some(152.0));
        assert!(store.latest_tick("NOPE", DataType::Trade).unwrap().is_none());
    }

    #[test]
    fn test_torn_record_truncated_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let t0 = us("20240115", 0);
        store
            .write_tick(TickData::trade("AAPL", t0, 150.0, 1.0, Side::Buy))
            .unwrap();
        store.flush().unwrap();

        // Simulate a crash mid-record
        let path = dir.path().join("AAPL").join("20240115.ticks");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 7]).unwrap();
        drop(file);
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);

        // Next append trims the torn tail, then writes a whole record
        store
            .write_tick(TickData::trade("AAPL", t0 + 1, 151.0, 1.0, Side::Buy))
            .unwrap();
        store.flush().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 50);

        let ticks = store
            .query_ticks("AAPL", t0, t0 + 10, Some(DataType::Trade))
            .unwrap();
        assert_eq!(ticks.len(), 2);
    }

    #[test]
    fn test_book_partition_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let t0 = us("20240115", 0);
        let book = BookRecord {
            timestamp_us: t0,
            bids: vec![BookLevelRecord { price: 100.0, size: 10.0, order_count: 2 }],
            asks: vec![
                BookLevelRecord { price: 100.5, size: 15.0, order_count: 1 },
                BookLevelRecord { price: 101.0, size: 25.0, order_count: 4 },
            ],
        };
        store
            .write_tick(TickData::order_book("AAPL", t0, book.clone()))
            .unwrap();

        let ticks = store
            .query_ticks("AAPL", t0, t0, Some(DataType::OrderBook))
            .unwrap();
        assert_eq!(ticks.len(), 1);
        let stored = ticks[0].book.as_ref().unwrap();
        assert_eq!(stored.bids, book.bids);
        assert_eq!(stored.asks, book.asks);
        // Top-of-book convenience fields are populated
        assert_eq!(ticks[0].bid_price, Some(100.0));
        assert_eq!(ticks[0].ask_price, Some(100.5));
    }

    #[test]
    fn test_compression_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let t0 = us("20240101", 0);
        store
            .write_tick(TickData::trade("AAPL", t0, 150.0, 1.0, Side::Buy))
            .unwrap();
        store.flush().unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        let n = store.compress_older_than(7, now).unwrap();
        assert_eq!(n, 1);

        let plain = dir.path().join("AAPL").join("20240101.ticks");
        let gz = dir.path().join("AAPL").join("20240101.ticks.gz");
        assert!(!plain.exists());
        assert!(gz.exists());

        // Reads decompress transparently
        let ticks = store
            .query_ticks("AAPL", t0, t0 + 10, Some(DataType::Trade))
            .unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].trade_price, Some(150.0));

        // Recent partitions stay uncompressed
        let recent = us("20240119", 0);
        store
            .write_tick(TickData::trade("AAPL", recent, 151.0, 1.0, Side::Buy))
            .unwrap();
        store.flush().unwrap();
        assert_eq!(store.compress_older_than(7, now).unwrap(), 0);
    }

    #[test]
    fn test_storage_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TickStore::open(dir.path()).unwrap();
        let t0 = us("20240115", 0);
        store
            .write_tick(TickData::trade("AAPL", t0, 150.0, 1.0, Side::Buy))
            .unwrap();
        store.flush().unwrap();
        let stats = store.storage_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "AAPL");
        assert_eq!(stats[0].1, 1);
        assert_eq!(stats[0].2, 25);
    }
}
