use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle interval supported by the engine. Signal monitoring always runs
/// on 1m candles; larger intervals drive strategy throttling and frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H4 => 240,
            Interval::D1 => 1440,
        }
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::M1),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "30m" => Some(Interval::M30),
            "1h" => Some(Interval::H1),
            "4h" => Some(Interval::H4),
            "1d" => Some(Interval::D1),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV bar at a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// OHLC shape invariants: `low <= min(open, close)`,
    /// `high >= max(open, close)`, non-negative volume.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.volume >= Decimal::ZERO
    }

    /// 1m candles must sit on a minute boundary.
    pub fn is_minute_aligned(&self) -> bool {
        self.timestamp.second() == 0 && self.timestamp.nanosecond() == 0
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// Whether the candle's range crosses the given level.
    pub fn crosses(&self, level: Decimal) -> bool {
        self.low <= level && level <= self.high
    }
}

/// Median of candle closes, used for anomaly detection.
pub fn median_close(candles: &[Candle]) -> Option<Decimal> {
    if candles.is_empty() {
        return None;
    }
    let mut closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    closes.sort();
    let mid = closes.len() / 2;
    if closes.len() % 2 == 0 {
        Some((closes[mid - 1] + closes[mid]) / Decimal::from(2))
    } else {
        Some(closes[mid])
    }
}
