use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use crate::schema::ExchangeApi;
use crate::types::{Candle, Interval};

const BINANCE_API: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Stock market-data connector over the Binance public klines endpoint.
/// Read-only: no API keys, no order placement.
#[derive(Debug, Clone)]
pub struct BinanceMarketData {
    client: Client,
    base_url: String,
    price_decimals: u32,
    quantity_decimals: u32,
}

impl BinanceMarketData {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: BINANCE_API.to_string(),
            price_decimals: 2,
            quantity_decimals: 5,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_precision(mut self, price_decimals: u32, quantity_decimals: u32) -> Self {
        self.price_decimals = price_decimals;
        self.quantity_decimals = quantity_decimals;
        self
    }

    fn parse_kline(kline: &[serde_json::Value]) -> anyhow::Result<Candle> {
        let open_time = kline
            .first()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("kline missing open time"))?;
        let field = |index: usize| -> anyhow::Result<Decimal> {
            let raw = kline
                .get(index)
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("kline missing field {}", index))?;
            Ok(Decimal::from_str(raw)?)
        };

        Ok(Candle {
            timestamp: Utc
                .timestamp_millis_opt(open_time)
                .single()
                .ok_or_else(|| anyhow::anyhow!("kline open time {} out of range", open_time))?,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        })
    }

    async fn fetch_page(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&limit={}",
            self.base_url,
            symbol,
            interval.as_str(),
            start.timestamp_millis(),
            limit.min(MAX_KLINES_PER_REQUEST)
        );

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let klines: Vec<Vec<serde_json::Value>> = response.json().await?;
        klines.iter().map(|k| Self::parse_kline(k)).collect()
    }
}

impl Default for BinanceMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApi for BinanceMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let mut all_candles: Vec<Candle> = Vec::with_capacity(limit);
        let mut cursor = since;

        // Binance caps each request at 1000 klines; page until satisfied.
        while all_candles.len() < limit {
            let remaining = limit - all_candles.len();
            let page = self.fetch_page(symbol, interval, cursor, remaining).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let last_timestamp = page.last().map(|c| c.timestamp);
            all_candles.extend(page);

            if page_len < remaining.min(MAX_KLINES_PER_REQUEST) {
                break;
            }
            if let Some(last) = last_timestamp {
                cursor = last + interval.as_duration();
            }
            // Stay under the public rate limits between pages.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        debug!(
            "fetched {} {} candles for {} since {}",
            all_candles.len(),
            interval,
            symbol,
            since
        );
        Ok(all_candles)
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        format!("{:.1$}", price, self.price_decimals as usize)
    }

    fn format_quantity(&self, _symbol: &str, quantity: Decimal) -> String {
        format!("{:.1$}", quantity, self.quantity_decimals as usize)
    }
}
