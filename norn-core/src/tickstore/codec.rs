use crate::core::{Side, StoreError};
use serde::{Deserialize, Serialize};

/// Byte width of one trade record
pub const TRADE_RECORD_SIZE: usize = 25;

/// Byte width of one quote record
pub const QUOTE_RECORD_SIZE: usize = 40;

/// Byte width of the book record header
pub const BOOK_HEADER_SIZE: usize = 12;

/// Byte width of one book level
pub const BOOK_LEVEL_SIZE: usize = 20;

/// Kind of tick carried by a [`TickData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Trade,
    Quote,
    OrderBook,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Trade => "TRADE",
            DataType::Quote => "QUOTE",
            DataType::OrderBook => "ORDERBOOK",
        }
    }

    /// Partition file extension for this data type
    pub fn extension(self) -> &'static str {
        match self {
            DataType::Trade => "ticks",
            DataType::Quote => "quotes",
            DataType::OrderBook => "book",
        }
    }
}

/// Generic tick data point, the unit of storage and replay.
///
/// Prices and sizes are `f64` at this layer: the wire format stores IEEE
/// doubles, and the store is the only place the system trades exactness for
/// throughput. Everything downstream converts to `Decimal` at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickData {
    /// Microseconds since the Unix epoch
    pub timestamp_us: u64,
    pub symbol: String,
    pub venue: String,
    pub data_type: DataType,
    pub trade_price: Option<f64>,
    pub trade_size: Option<f64>,
    pub trade_side: Option<Side>,
    pub bid_price: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_price: Option<f64>,
    pub ask_size: Option<f64>,
    /// Book levels, only set for `DataType::OrderBook`
    pub book: Option<BookRecord>,
}

impl TickData {
    pub fn trade(
        symbol: impl Into<String>,
        timestamp_us: u64,
        price: f64,
        size: f64,
        side: Side,
    ) -> Self {
        Self {
            timestamp_us,
            symbol: symbol.into(),
            venue: String::new(),
            data_type: DataType::Trade,
            trade_price: Some(price),
            trade_size: Some(size),
            trade_side: Some(side),
            bid_price: None,
            bid_size: None,
            ask_price: None,
            ask_size: None,
            book: None,
        }
    }

    pub fn quote(
        symbol: impl Into<String>,
        timestamp_us: u64,
        bid_price: f64,
        bid_size: f64,
        ask_price: f64,
        ask_size: f64,
    ) -> Self {
        Self {
            timestamp_us,
            symbol: symbol.into(),
            venue: String::new(),
            data_type: DataType::Quote,
            trade_price: None,
            trade_size: None,
            trade_side: None,
            bid_price: Some(bid_price),
            bid_size: Some(bid_size),
            ask_price: Some(ask_price),
            ask_size: Some(ask_size),
            book: None,
        }
    }

    pub fn order_book(symbol: impl Into<String>, timestamp_us: u64, book: BookRecord) -> Self {
        let (bid_price, bid_size) = book
            .bids
            .first()
            .map(|l| (Some(l.price), Some(l.size)))
            .unwrap_or((None, None));
        let (ask_price, ask_size) = book
            .asks
            .first()
            .map(|l| (Some(l.price), Some(l.size)))
            .unwrap_or((None, None));
        Self {
            timestamp_us,
            symbol: symbol.into(),
            venue: String::new(),
            data_type: DataType::OrderBook,
            trade_price: None,
            trade_size: None,
            trade_side: None,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            book: Some(book),
        }
    }
}

/// Fixed-width trade record: `[u64 ts_us | f64 price | f64 qty | i8 side]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeRecord {
    pub timestamp_us: u64,
    pub price: f64,
    pub quantity: f64,
    /// 0 = BUY, 1 = SELL
    pub side: i8,
}

impl TradeRecord {
    pub fn encode(&self) -> [u8; TRADE_RECORD_SIZE] {
        let mut buf = [0u8; TRADE_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[8..16].copy_from_slice(&self.price.to_le_bytes());
        buf[16..24].copy_from_slice(&self.quantity.to_le_bytes());
        buf[24] = self.side as u8;
        buf
    }

    pub fn decode(buf: &[u8; TRADE_RECORD_SIZE]) -> Self {
        Self {
            timestamp_us: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            price: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            quantity: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            side: buf[24] as i8,
        }
    }

    pub fn side_enum(&self) -> Side {
        if self.side == 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn from_tick(tick: &TickData) -> Option<Self> {
        Some(Self {
            timestamp_us: tick.timestamp_us,
            price: tick.trade_price?,
            quantity: tick.trade_size?,
            side: match tick.trade_side? {
                Side::Buy => 0,
                Side::Sell => 1,
            },
        })
    }

    pub fn into_tick(self, symbol: &str) -> TickData {
        TickData::trade(
            symbol,
            self.timestamp_us,
            self.price,
            self.quantity,
            self.side_enum(),
        )
    }
}

/// Fixed-width quote record:
/// `[u64 ts_us | f64 bid_px | f64 bid_sz | f64 ask_px | f64 ask_sz]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteRecord {
    pub timestamp_us: u64,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

impl QuoteRecord {
    pub fn encode(&self) -> [u8; QUOTE_RECORD_SIZE] {
        let mut buf = [0u8; QUOTE_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[8..16].copy_from_slice(&self.bid_price.to_le_bytes());
        buf[16..24].copy_from_slice(&self.bid_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.ask_price.to_le_bytes());
        buf[32..40].copy_from_slice(&self.ask_size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; QUOTE_RECORD_SIZE]) -> Self {
        Self {
            timestamp_us: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            bid_price: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            bid_size: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            ask_price: f64::from_le_bytes(buf[24..32].try_into().unwrap()),
            ask_size: f64::from_le_bytes(buf[32..40].try_into().unwrap()),
        }
    }

    pub fn from_tick(tick: &TickData) -> Option<Self> {
        Some(Self {
            timestamp_us: tick.timestamp_us,
            bid_price: tick.bid_price?,
            bid_size: tick.bid_size?,
            ask_price: tick.ask_price?,
            ask_size: tick.ask_size?,
        })
    }

    pub fn into_tick(self, symbol: &str) -> TickData {
        TickData::quote(
            symbol,
            self.timestamp_us,
            self.bid_price,
            self.bid_size,
            self.ask_price,
            self.ask_size,
        )
    }
}

/// One level of a stored book snapshot:
/// `[f64 price | f64 size | i32 order_count]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevelRecord {
    pub price: f64,
    pub size: f64,
    pub order_count: i32,
}

/// Variable-width book snapshot record:
/// header `[u64 ts_us | u16 n_bids | u16 n_asks]`, then bid levels, then
/// ask levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    #[serde(skip)]
    pub timestamp_us: u64,
    #[serde(with = "levels_serde")]
    pub bids: Vec<BookLevelRecord>,
    #[serde(with = "levels_serde")]
    pub asks: Vec<BookLevelRecord>,
}

// Book levels serialize as (price, size, count) tuples in JSON contexts
mod levels_serde {
    use super::BookLevelRecord;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(levels: &[BookLevelRecord], s: S) -> Result<S::Ok, S::Error> {
        let tuples: Vec<(f64, f64, i32)> = levels
            .iter()
            .map(|l| (l.price, l.size, l.order_count))
            .collect();
        tuples.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<BookLevelRecord>, D::Error> {
        let tuples = Vec::<(f64, f64, i32)>::deserialize(d)?;
        Ok(tuples
            .into_iter()
            .map(|(price, size, order_count)| BookLevelRecord {
                price,
                size,
                order_count,
            })
            .collect())
    }
}

impl BookRecord {
    pub fn encoded_len(&self) -> usize {
        BOOK_HEADER_SIZE + (self.bids.len() + self.asks.len()) * BOOK_LEVEL_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.timestamp_us.to_le_bytes());
        buf.extend_from_slice(&(self.bids.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(self.asks.len() as u16).to_le_bytes());
        for level in self.bids.iter().chain(self.asks.iter()) {
            buf.extend_from_slice(&level.price.to_le_bytes());
            buf.extend_from_slice(&level.size.to_le_bytes());
            buf.extend_from_slice(&level.order_count.to_le_bytes());
        }
        buf
    }

    /// Decode one record from the front of `buf`. Returns the record and
    /// the number of bytes consumed, or `None` when `buf` holds only a
    /// partial record (a torn tail).
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < BOOK_HEADER_SIZE {
            return None;
        }
        let timestamp_us = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let n_bids = u16::from_le_bytes(buf[8..10].try_into().unwrap()) as usize;
        let n_asks = u16::from_le_bytes(buf[10..12].try_into().unwrap()) as usize;
        let total = BOOK_HEADER_SIZE + (n_bids + n_asks) * BOOK_LEVEL_SIZE;
        if buf.len() < total {
            return None;
        }
        let mut levels = Vec::with_capacity(n_bids + n_asks);
        let mut offset = BOOK_HEADER_SIZE;
        for _ in 0..(n_bids + n_asks) {
            levels.push(BookLevelRecord {
                price: f64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()),
                size: f64::from_le_bytes(buf[offset + 8..offset + 16].try_into().unwrap()),
                order_count: i32::from_le_bytes(buf[offset + 16..offset + 20].try_into().unwrap()),
            });
            offset += BOOK_LEVEL_SIZE;
        }
        let asks = levels.split_off(n_bids);
        Some((
            Self {
                timestamp_us,
                bids: levels,
                asks,
            },
            total,
        ))
    }

    pub fn into_tick(self, symbol: &str) -> TickData {
        let ts = self.timestamp_us;
        TickData::order_book(symbol, ts, self)
    }
}

/// Validate a tick is complete for its declared data type
pub fn validate_tick(tick: &TickData) -> Result<(), StoreError> {
    let ok = match tick.data_type {
        DataType::Trade => {
            tick.trade_price.is_some() && tick.trade_size.is_some() && tick.trade_side.is_some()
        }
        DataType::Quote => {
            tick.bid_price.is_some()
                && tick.bid_size.is_some()
                && tick.ask_price.is_some()
                && tick.ask_size.is_some()
        }
        DataType::OrderBook => tick.book.is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::Corrupt {
            path: tick.symbol.clone(),
            reason: format!("incomplete {} tick", tick.data_type.as_str()),
        })
    }
}
