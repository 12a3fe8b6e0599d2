//! OANDA broker provider implementation.

use reqwest::Method;

use crate::core::{self, AccountSnapshot, AccountSummary, Trade, TradeKind};
use crate::util::{check_status, ServerError};

/// How many fill transactions back the closed-trades view reaches.
const CLOSED_TRADE_PAGE_SIZE: u32 = 50;

pub struct Provider {
    pub client: reqwest::Client,
    pub api_key: String,
    pub account_id: String,
    pub base_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

impl Provider {
    fn build_account_url(&self, tail: &str) -> String {
        format!("{}/v3/accounts/{}{}", self.base_url, self.account_id, tail)
    }

    fn build_request(&self, method: Method, url: &str) -> Result<reqwest::Request, Error> {
        self.client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .build()
            .map_err(Error::Reqwest)
    }

    async fn get_json<T>(&self, url: &str) -> Result<T, Error>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let request = self.build_request(Method::GET, url)?;
        let res = self.client.execute(request).await.map_err(Error::Reqwest)?;
        check_status(&res)?;
        res.json().await.map_err(Error::Reqwest)
    }

    async fn summary(&self) -> Result<model::AccountEnvelope, Error> {
        self.get_json(&self.build_account_url("/summary")).await
    }

    async fn open_trades(&self) -> Result<model::TradeList, Error> {
        self.get_json(&self.build_account_url("/trades?state=OPEN"))
            .await
    }

    async fn fill_transactions(&self) -> Result<model::TransactionList, Error> {
        let url = self.build_account_url(&format!(
            "/transactions?type=ORDER_FILL&pageSize={}",
            CLOSED_TRADE_PAGE_SIZE
        ));
        self.get_json(&url).await
    }

    async fn account_snapshot(&self) -> Result<AccountSnapshot, Error> {
        let (summary, open, fills) = tokio::try_join!(
            self.summary(),
            self.open_trades(),
            self.fill_transactions(),
        )?;
        Ok(assemble_snapshot(
            summary.account,
            open.trades,
            fills.transactions,
        ))
    }
}

fn assemble_snapshot(
    account: model::Account,
    open: Vec<model::OpenTrade>,
    transactions: Vec<model::Transaction>,
) -> AccountSnapshot {
    let open_trades = open
        .into_iter()
        .map(|trade| Trade {
            id: trade.id,
            instrument: trade.instrument,
            units: trade.current_units,
            price: trade.price,
            unrealized_pl: Some(trade.unrealized_pl),
            pl: None,
            open_time: Some(trade.open_time),
            time: None,
            kind: TradeKind::Open,
        })
        .collect();

    let mut closed_trades: Vec<Trade> = transactions
        .into_iter()
        .filter(|tx| tx.kind == model::TRANSACTION_ORDER_FILL)
        .map(|tx| Trade {
            id: tx.id,
            instrument: tx.instrument,
            units: tx.units,
            price: tx.price,
            unrealized_pl: None,
            pl: Some(tx.pl),
            open_time: None,
            time: Some(tx.time),
            kind: TradeKind::Closed,
        })
        .collect();
    // The transaction feed is oldest first; the recent-trades table wants
    // the latest fills on top.
    closed_trades.reverse();

    AccountSnapshot {
        account: AccountSummary {
            balance: account.balance,
            nav: account.nav,
            unrealized_pl: account.unrealized_pl,
            currency: account.currency,
            open_trade_count: account.open_trade_count,
        },
        open_trades,
        closed_trades,
    }
}

mod model {
    use serde::Deserialize;

    pub const TRANSACTION_ORDER_FILL: &str = "ORDER_FILL";

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct AccountEnvelope {
        #[serde(default)]
        pub account: Account,
    }

    /// Subset of the account summary the dashboard displays. Decimal fields
    /// arrive as strings and stay strings.
    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Account {
        #[serde(default)]
        pub balance: String,
        #[serde(rename = "NAV", default)]
        pub nav: String,
        #[serde(rename = "unrealizedPL", default)]
        pub unrealized_pl: String,
        #[serde(default)]
        pub currency: String,
        #[serde(default)]
        pub open_trade_count: i64,
    }

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct TradeList {
        #[serde(default)]
        pub trades: Vec<OpenTrade>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OpenTrade {
        pub id: String,
        pub instrument: String,
        #[serde(default)]
        pub current_units: String,
        #[serde(default)]
        pub price: String,
        #[serde(rename = "unrealizedPL", default)]
        pub unrealized_pl: String,
        #[serde(default)]
        pub open_time: String,
    }

    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct TransactionList {
        #[serde(default)]
        pub transactions: Vec<Transaction>,
    }

    /// Transactions other than fills can miss most of these fields, hence
    /// the defaults.
    #[derive(Default, Debug, Clone, PartialEq, Deserialize)]
    pub struct Transaction {
        #[serde(default)]
        pub id: String,
        #[serde(rename = "type", default)]
        pub kind: String,
        #[serde(default)]
        pub instrument: String,
        #[serde(default)]
        pub units: String,
        #[serde(default)]
        pub price: String,
        #[serde(default)]
        pub pl: String,
        #[serde(default)]
        pub time: String,
    }
}

#[async_trait::async_trait]
impl core::Broker for Provider {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, anyhow::Error> {
        let snapshot = self.account_snapshot().await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_summary_parses_broker_casing() {
        let raw = r#"{
            "account": {
                "balance": "100000.0000",
                "NAV": "100123.4567",
                "unrealizedPL": "123.4567",
                "currency": "USD",
                "openTradeCount": 2,
                "marginUsed": "50.0"
            }
        }"#;
        let envelope: model::AccountEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.account.nav, "100123.4567");
        assert_eq!(envelope.account.unrealized_pl, "123.4567");
        assert_eq!(envelope.account.open_trade_count, 2);
    }

    #[test]
    fn snapshot_keeps_fills_only_and_puts_latest_first() {
        let fill = |id: &str| model::Transaction {
            id: id.into(),
            kind: model::TRANSACTION_ORDER_FILL.into(),
            instrument: "EUR_USD".into(),
            units: "100".into(),
            price: "1.1".into(),
            pl: "5.0".into(),
            time: "2024-01-15T10:30:00Z".into(),
        };
        let noise = model::Transaction {
            id: "3".into(),
            kind: "ORDER_CANCEL".into(),
            ..Default::default()
        };

        let snapshot = assemble_snapshot(
            model::Account::default(),
            Vec::new(),
            vec![fill("1"), noise, fill("2")],
        );

        assert_eq!(snapshot.closed_trades.len(), 2);
        assert_eq!(snapshot.closed_trades[0].id, "2");
        assert_eq!(snapshot.closed_trades[0].kind, TradeKind::Closed);
        assert_eq!(snapshot.closed_trades[0].pl.as_deref(), Some("5.0"));
    }

    #[test]
    fn open_trades_map_current_units() {
        let open = model::OpenTrade {
            id: "7".into(),
            instrument: "XAU_USD".into(),
            current_units: "-10".into(),
            price: "2031.5".into(),
            unrealized_pl: "-4.2".into(),
            open_time: "2024-01-15T09:00:00Z".into(),
        };

        let snapshot =
            assemble_snapshot(model::Account::default(), vec![open], Vec::new());

        let trade = &snapshot.open_trades[0];
        assert_eq!(trade.units, "-10");
        assert_eq!(trade.kind, TradeKind::Open);
        assert_eq!(trade.unrealized_pl.as_deref(), Some("-4.2"));
        assert!(trade.pl.is_none());
    }

    #[test]
    fn account_urls_nest_under_the_account() {
        let provider = Provider {
            client: reqwest::Client::new(),
            api_key: "key".into(),
            account_id: "101-001-38200759-001".into(),
            base_url: "https://api-fxpractice.oanda.com".into(),
        };
        assert_eq!(
            provider.build_account_url("/summary"),
            "https://api-fxpractice.oanda.com/v3/accounts/101-001-38200759-001/summary"
        );
    }

    #[test]
    fn requests_carry_the_bearer_key() {
        let provider = Provider {
            client: reqwest::Client::new(),
            api_key: "key".into(),
            account_id: "acct".into(),
            base_url: "https://api-fxpractice.oanda.com".into(),
        };
        let req = provider
            .build_request(Method::GET, &provider.build_account_url("/summary"))
            .unwrap();
        assert_eq!(
            req.headers()[reqwest::header::AUTHORIZATION],
            "Bearer key"
        );
    }
}
