// exchange/types.rs
// Binance REST and stream schemas

use feedsync_common::{Candle, DepthSnapshot, DepthUpdate, Trade};
use serde::Deserialize;
use serde_json::Value;

use super::errors::ExchangeError;
use super::traits::StreamPayload;
use super::utils::{parse_levels, parse_price, parse_size};

// =================================================================
// REST
// =================================================================

#[derive(Debug, Deserialize)]
pub struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl DepthSnapshotResponse {
    pub fn into_snapshot(self, symbol: &str) -> Result<DepthSnapshot, ExchangeError> {
        Ok(DepthSnapshot {
            symbol: symbol.to_string(),
            last_update_id: self.last_update_id,
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RestTrade {
    pub id: u64,
    pub price: String,
    pub qty: String,
    #[serde(rename = "quoteQty")]
    pub quote_qty: String,
    pub time: i64,
    #[serde(rename = "isBuyerMaker")]
    pub is_buyer_maker: bool,
    #[serde(rename = "isBestMatch", default)]
    pub is_best_match: bool,
}

impl TryFrom<RestTrade> for Trade {
    type Error = ExchangeError;

    fn try_from(raw: RestTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: raw.id,
            price: parse_price(&raw.price)?,
            quantity: parse_size(&raw.qty)?,
            quote_quantity: parse_size(&raw.quote_qty)?,
            time: raw.time,
            is_buyer_maker: raw.is_buyer_maker,
            is_best_match: raw.is_best_match,
        })
    }
}

/// Kline rows come as positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, takerBase, takerQuote, ignore]`
pub fn parse_kline_row(row: &[Value], now_ms: i64) -> Result<Candle, ExchangeError> {
    fn int(row: &[Value], idx: usize) -> Result<i64, ExchangeError> {
        row.get(idx)
            .and_then(Value::as_i64)
            .ok_or_else(|| ExchangeError::ParseError(format!("kline field {} is not an integer", idx)))
    }
    fn text(row: &[Value], idx: usize) -> Result<&str, ExchangeError> {
        row.get(idx)
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::ParseError(format!("kline field {} is not a string", idx)))
    }

    let close_time = int(row, 6)?;
    Ok(Candle {
        open_time: int(row, 0)?,
        open: parse_price(text(row, 1)?)?,
        high: parse_price(text(row, 2)?)?,
        low: parse_price(text(row, 3)?)?,
        close: parse_price(text(row, 4)?)?,
        volume: parse_size(text(row, 5)?)?,
        close_time,
        quote_volume: parse_size(text(row, 7)?)?,
        trade_count: u64::try_from(int(row, 8)?)
            .map_err(|_| ExchangeError::ParseError("negative kline trade count".to_string()))?,
        taker_buy_base_volume: parse_size(text(row, 9)?)?,
        taker_buy_quote_volume: parse_size(text(row, 10)?)?,
        // History carries no close flag; a candle whose window has ended is final.
        is_closed: close_time < now_ms,
    })
}

// =================================================================
// Streams
// =================================================================

/// `<symbol>@depth`
#[derive(Debug, Deserialize)]
pub struct DepthUpdateMessage {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

impl StreamPayload for DepthUpdateMessage {
    type Event = DepthUpdate;
    const EVENT_TYPE: &'static str = "depthUpdate";

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn into_event(self) -> Result<DepthUpdate, ExchangeError> {
        Ok(DepthUpdate {
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
            symbol: self.symbol,
            event_time: self.event_time,
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
        })
    }
}

/// `<symbol>@trade`
#[derive(Debug, Deserialize)]
pub struct TradeMessage {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

impl StreamPayload for TradeMessage {
    type Event = Trade;
    const EVENT_TYPE: &'static str = "trade";

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn into_event(self) -> Result<Trade, ExchangeError> {
        let price = parse_price(&self.price)?;
        let quantity = parse_size(&self.quantity)?;
        let quote_quantity = price
            .checked_mul(quantity)
            .ok_or_else(|| ExchangeError::ParseError(format!("trade {} notional overflows", self.trade_id)))?;
        Ok(Trade {
            id: self.trade_id,
            price,
            quantity,
            quote_quantity,
            time: self.trade_time,
            is_buyer_maker: self.is_buyer_maker,
            is_best_match: self.is_best_match,
        })
    }
}

/// `<symbol>@kline_<interval>`
#[derive(Debug, Deserialize)]
pub struct KlineMessage {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
pub struct KlinePayload {
    #[serde(rename = "t")]
    pub start_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "f", default)]
    pub first_trade_id: i64,
    #[serde(rename = "L", default)]
    pub last_trade_id: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "x")]
    pub is_closed: bool,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "V")]
    pub taker_buy_base_volume: String,
    #[serde(rename = "Q")]
    pub taker_buy_quote_volume: String,
}

impl StreamPayload for KlineMessage {
    type Event = Candle;
    const EVENT_TYPE: &'static str = "kline";

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn into_event(self) -> Result<Candle, ExchangeError> {
        let k = self.kline;
        Ok(Candle {
            open_time: k.start_time,
            close_time: k.close_time,
            open: parse_price(&k.open)?,
            high: parse_price(&k.high)?,
            low: parse_price(&k.low)?,
            close: parse_price(&k.close)?,
            volume: parse_size(&k.volume)?,
            quote_volume: parse_size(&k.quote_volume)?,
            trade_count: k.trade_count,
            taker_buy_base_volume: parse_size(&k.taker_buy_base_volume)?,
            taker_buy_quote_volume: parse_size(&k.taker_buy_quote_volume)?,
            is_closed: k.is_closed,
        })
    }
}
