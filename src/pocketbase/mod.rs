//! PocketBase provider implementation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use tracing::{debug, warn};

use self::auth::Token;
use crate::core::{
    self, Bar, Candle, CollectionStats, CollectionTotal, Experience, Health, MarketDataStats,
    Page, RecordQuery,
};
use crate::util::{check_status, ServerError};

pub mod auth;

/// The health probe gets a tighter bound than ordinary requests so an
/// unreachable backend shows up as "offline" within a few seconds.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client<AuthTokenProvider> {
    pub client: reqwest::Client,
    pub base_url: String,
    pub auth_token_provider: AuthTokenProvider,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<AuthError> {
    #[error("auth: {0}")]
    Auth(#[source] AuthError),
    #[error("authorization header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

impl<AuthTokenProvider> Client<AuthTokenProvider>
where
    AuthTokenProvider: auth::TokenProvider,
    <AuthTokenProvider as auth::TokenProvider>::Error: std::error::Error + 'static,
{
    async fn get_auth_token(&self) -> Result<String, Error<AuthTokenProvider::Error>> {
        let token = self
            .auth_token_provider
            .get_auth_token()
            .await
            .map_err(Error::Auth)?;
        Ok(token.access_token().to_owned())
    }

    fn build_request(
        &self,
        auth_token: &str,
        method: Method,
        path: &str,
        headers: HeaderMap,
    ) -> Result<reqwest::Request, Error<AuthTokenProvider::Error>> {
        // The path is appended verbatim; callers encode their own queries.
        let url = format!("{}{}", self.base_url, path);

        let mut headers = headers;
        // A caller-supplied Authorization header wins over the cached token.
        headers
            .entry(AUTHORIZATION)
            .or_insert(HeaderValue::from_str(auth_token)?);

        self.client
            .request(method, url)
            .headers(headers)
            .build()
            .map_err(Error::Reqwest)
    }

    /// Issue an authenticated request and hand back the raw response.
    /// Non-2xx statuses are left for the caller to interpret.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::Response, Error<AuthTokenProvider::Error>> {
        self.request_with_headers(method, path, HeaderMap::new())
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, Error<AuthTokenProvider::Error>> {
        let auth_token = self.get_auth_token().await?;
        let request = self.build_request(&auth_token, method, path, headers)?;
        let res = self.client.execute(request).await.map_err(Error::Reqwest)?;
        Ok(res)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, Error<AuthTokenProvider::Error>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let res = self.request(Method::GET, path).await?;
        check_status(&res)?;
        res.json().await.map_err(Error::Reqwest)
    }

    fn build_records_path(collection: &str, sort: &str, query: &RecordQuery) -> String {
        let mut clauses = Vec::new();
        if let Some(strategy) = &query.strategy {
            clauses.push(format!("strategy=\"{}\"", strategy));
        }
        if let Some(symbol) = &query.symbol {
            clauses.push(format!("symbol=\"{}\"", symbol));
        }

        let mut params = vec![
            ("sort", sort.to_owned()),
            ("perPage", query.per_page.to_string()),
            ("page", query.page.to_string()),
        ];
        let filter = clauses.join("&&");
        if !filter.is_empty() {
            params.push(("filter", filter));
        }

        let query_string =
            serde_urlencoded::to_string(&params).expect("string pairs always encode");
        format!("/api/collections/{}/records?{}", collection, query_string)
    }

    /// Record count of a collection, via a single-item page probe. A failed
    /// probe degrades to zero so one missing collection cannot take down the
    /// whole stats payload.
    async fn count(&self, collection: &str, filter: Option<&str>) -> u64 {
        let mut params = vec![("perPage", "1".to_owned())];
        if let Some(filter) = filter {
            params.push(("filter", filter.to_owned()));
        }
        let query_string =
            serde_urlencoded::to_string(&params).expect("string pairs always encode");
        let path = format!("/api/collections/{}/records?{}", collection, query_string);

        match self.get_json::<Page<serde_json::Value>>(&path).await {
            Ok(page) => page.total_items,
            Err(err) => {
                debug!(message = "Count probe failed", collection, error = %err);
                0
            }
        }
    }

    async fn symbol_counts(&self) -> BTreeMap<String, u64> {
        let probes = core::SYMBOLS.iter().map(|symbol| {
            let filter = format!("symbol=\"{}\"", symbol);
            async move {
                let count = self.count("market_data", Some(&filter)).await;
                ((*symbol).to_owned(), count)
            }
        });
        join_all(probes).await.into_iter().collect()
    }

    async fn stats(&self) -> CollectionStats {
        let (market_total, experiences_total, training_total, by_symbol) = tokio::join!(
            self.count("market_data", None),
            self.count("experiences", None),
            self.count("training_experiences", None),
            self.symbol_counts(),
        );

        CollectionStats {
            market_data: MarketDataStats {
                total: market_total,
                by_symbol,
            },
            experiences: CollectionTotal {
                total: experiences_total,
            },
            training_experiences: CollectionTotal {
                total: training_total,
            },
        }
    }

    async fn training_experiences(
        &self,
        query: &RecordQuery,
    ) -> Result<Page<Experience>, Error<AuthTokenProvider::Error>> {
        let path = Self::build_records_path("training_experiences", "-created", query);
        self.get_json(&path).await
    }

    async fn market_data(
        &self,
        query: &RecordQuery,
    ) -> Result<Page<Bar>, Error<AuthTokenProvider::Error>> {
        let path = Self::build_records_path("market_data", "-timestamp", query);
        self.get_json(&path).await
    }

    async fn candles(
        &self,
        symbol: &str,
        count: u32,
    ) -> Result<Vec<Candle>, Error<AuthTokenProvider::Error>> {
        let query = RecordQuery {
            symbol: Some(symbol.to_owned()),
            strategy: None,
            per_page: count,
            page: 1,
        };
        let page: Page<Bar> = self
            .get_json(&Self::build_records_path("market_data", "-timestamp", &query))
            .await?;
        Ok(bars_to_candles(page.items))
    }

    /// The probe skips authentication, like the health endpoint itself.
    async fn health(&self) -> Health {
        let started = Instant::now();
        let result = self
            .client
            .get(format!("{}/api/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        let latency = started.elapsed().as_millis() as u64;

        let degraded = |error: String| {
            warn!(message = "Database health probe failed", %error);
            Health {
                healthy: false,
                latency,
                data: None,
                error: Some(error),
            }
        };

        let res = match result {
            Ok(res) => res,
            Err(err) => return degraded(err.to_string()),
        };
        if let Err(err) = check_status(&res) {
            return degraded(err.to_string());
        }
        match res.json().await {
            Ok(data) => Health {
                healthy: true,
                latency,
                data: Some(data),
                error: None,
            },
            Err(err) => degraded(err.to_string()),
        }
    }
}

fn bars_to_candles(bars: Vec<Bar>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = bars
        .into_iter()
        .filter_map(|bar| {
            // Records with unreadable timestamps cannot be charted; drop them.
            let time = parse_timestamp(&bar.timestamp)?;
            Some(Candle {
                time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
        })
        .collect();
    candles.sort_by_key(|candle| candle.time);
    candles
}

/// PocketBase reports timestamps either as RFC 3339 or in its own
/// `YYYY-MM-DD HH:MM:SS.mmmZ` form.
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp());
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.fZ")
        .ok()
        .map(|parsed| parsed.and_utc().timestamp())
}

#[async_trait::async_trait]
impl<AuthTokenProvider> core::Database for Client<AuthTokenProvider>
where
    AuthTokenProvider: auth::TokenProvider,
    <AuthTokenProvider as auth::TokenProvider>::Error: std::error::Error + 'static,
{
    async fn health(&self) -> Health {
        self.health().await
    }

    async fn stats(&self) -> Result<CollectionStats, anyhow::Error> {
        Ok(self.stats().await)
    }

    async fn training_experiences(
        &self,
        query: &RecordQuery,
    ) -> Result<Page<Experience>, anyhow::Error> {
        let page = self.training_experiences(query).await?;
        Ok(page)
    }

    async fn market_data(&self, query: &RecordQuery) -> Result<Page<Bar>, anyhow::Error> {
        let page = self.market_data(query).await?;
        Ok(page)
    }

    async fn candles(&self, symbol: &str, count: u32) -> Result<Vec<Candle>, anyhow::Error> {
        let candles = self.candles(symbol, count).await?;
        Ok(candles)
    }
}
