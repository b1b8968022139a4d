// projection/candles.rs

use feedsync_common::Candle;
use serde::Deserialize;

use super::{ApplyOutcome, DiscardReason, Projection};

/// When a candle may be handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleEligibility {
    /// The exchange marked the candle closed.
    #[default]
    ClosedFlag,
    /// `close_time > open_time`. Holds for nearly every candle, open or not,
    /// so in-progress candles get flushed and later revisions are lost.
    CloseAfterOpen,
}

impl CandleEligibility {
    pub fn is_eligible(&self, candle: &Candle) -> bool {
        match self {
            CandleEligibility::ClosedFlag => candle.is_closed,
            CandleEligibility::CloseAfterOpen => candle.close_time > candle.open_time,
        }
    }
}

/// Ascending, open-time keyed candles plus a flush cursor.
///
/// Only the last candle may be rewritten (an in-progress interval). The
/// cursor marks the first candle not yet handed out and never moves back.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    symbol: String,
    interval: String,
    candles: Vec<Candle>,
    flush_cursor: usize,
    eligibility: CandleEligibility,
}

impl CandleSeries {
    pub fn new(symbol: &str, interval: &str, eligibility: CandleEligibility) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            candles: Vec::new(),
            flush_cursor: 0,
            eligibility,
        }
    }

    /// Seed from REST history. Each row goes through `update`, so duplicates
    /// collapse and ordering holds the same way as for stream events.
    pub fn from_history(
        symbol: &str,
        interval: &str,
        history: Vec<Candle>,
        eligibility: CandleEligibility,
    ) -> Self {
        let mut series = Self::new(symbol, interval, eligibility);
        for candle in history {
            series.update(candle);
        }
        series
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn flush_cursor(&self) -> usize {
        self.flush_cursor
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Append a new interval or overwrite the in-progress one.
    ///
    /// Returns `false` (and changes nothing) for a candle older than the last
    /// one, which would break the ascending key order. Appending a newer
    /// interval marks the previous last candle closed: no further update can
    /// reach it, even if its final closed event was never received.
    pub fn update(&mut self, candle: Candle) -> bool {
        match self.candles.last_mut() {
            Some(last) if last.open_time == candle.open_time => {
                *last = candle;
                return true;
            }
            Some(last) if last.open_time > candle.open_time => return false,
            Some(last) => last.is_closed = true,
            None => {}
        }
        self.candles.push(candle);
        true
    }

    /// Hand out the eligible candles past the cursor and advance it.
    ///
    /// The scan stops at the first ineligible candle so the cursor never skips
    /// one; calling this twice without an update in between yields nothing
    /// the second time.
    pub fn extract_unflushed(&mut self) -> Vec<Candle> {
        let pending = &self.candles[self.flush_cursor..];
        let eligible = pending
            .iter()
            .take_while(|candle| self.eligibility.is_eligible(candle))
            .count();

        let batch = pending[..eligible].to_vec();
        self.flush_cursor += eligible;
        batch
    }
}

impl Projection for CandleSeries {
    type Event = Candle;
    type View = CandleSeriesView;

    fn apply(&mut self, event: Candle) -> ApplyOutcome {
        let open_time = event.open_time;
        let last_open_time = self.candles.last().map(|c| c.open_time);
        if self.update(event) {
            return ApplyOutcome::Applied;
        }
        ApplyOutcome::Discarded(DiscardReason::OutOfOrder {
            open_time,
            last_open_time: last_open_time.unwrap_or_default(),
        })
    }

    fn view(&self) -> CandleSeriesView {
        CandleSeriesView {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            candles: self.candles.clone(),
            flush_cursor: self.flush_cursor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeriesView {
    pub symbol: String,
    pub interval: String,
    pub candles: Vec<Candle>,
    pub flush_cursor: usize,
}
