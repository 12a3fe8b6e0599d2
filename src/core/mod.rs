use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Instruments the trading agent is tracked against. Collection records are
/// keyed by these names, so the stats fan-out probes each of them.
pub const SYMBOLS: [&str; 9] = [
    "EUR_USD",
    "GBP_USD",
    "USD_JPY",
    "XAU_USD",
    "BTC_USD",
    "OIL_USD",
    "SPX500_USD",
    "US30_USD",
    "NAS100_USD",
];

pub struct Core {
    pub database: Box<dyn Database>,
    pub broker: Box<dyn Broker>,
}

/// Read-only view over the document database the trading agent writes to.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn health(&self) -> Health;
    async fn stats(&self) -> Result<CollectionStats, anyhow::Error>;
    async fn training_experiences(
        &self,
        query: &RecordQuery,
    ) -> Result<Page<Experience>, anyhow::Error>;
    async fn market_data(&self, query: &RecordQuery) -> Result<Page<Bar>, anyhow::Error>;
    async fn candles(&self, symbol: &str, count: u32) -> Result<Vec<Candle>, anyhow::Error>;
}

/// Read-only view over the broker account the agent trades on.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, anyhow::Error>;
}

#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub per_page: u32,
    pub page: u32,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            strategy: None,
            symbol: None,
            per_page: 50,
            page: 1,
        }
    }
}

/// PocketBase list envelope, passed through to the frontend unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub items: Vec<T>,
}

/// One OHLCV record as stored in the `market_data` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    #[serde(default)]
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub created: String,
}

/// Chart-ready candlestick; `time` is unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One training episode from the `training_experiences` collection. The
/// `action`/`state` payloads are opaque to the dashboard and pass through
/// as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    #[serde(default)]
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    #[serde(default)]
    pub action: serde_json::Value,
    pub reward: f64,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub next_state: serde_json::Value,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub created: String,
}

/// Outcome of the database health probe. Never an error: an unreachable
/// backend is a degraded-but-valid answer for a monitoring view.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub healthy: bool,
    /// Probe round trip in milliseconds.
    pub latency: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    pub market_data: MarketDataStats,
    pub experiences: CollectionTotal,
    pub training_experiences: CollectionTotal,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataStats {
    pub total: u64,
    pub by_symbol: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionTotal {
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account: AccountSummary,
    pub open_trades: Vec<Trade>,
    pub closed_trades: Vec<Trade>,
}

/// Broker account headline figures. The broker reports decimals as strings
/// and the dashboard keeps them opaque, so these stay strings too.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub balance: String,
    pub nav: String,
    #[serde(rename = "unrealizedPL")]
    pub unrealized_pl: String,
    pub currency: String,
    pub open_trade_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub instrument: String,
    pub units: String,
    pub price: String,
    #[serde(rename = "unrealizedPL", skip_serializing_if = "Option::is_none")]
    pub unrealized_pl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "type")]
    pub kind: TradeKind,
}

pub fn reward_total(experiences: &[Experience]) -> f64 {
    experiences.iter().map(|exp| exp.reward).sum()
}

/// Percentage of episodes with a positive reward; 0.0 when there are none.
pub fn win_rate(experiences: &[Experience]) -> f64 {
    if experiences.is_empty() {
        return 0.0;
    }
    let wins = experiences.iter().filter(|exp| exp.reward > 0.0).count();
    wins as f64 / experiences.len() as f64 * 100.0
}
