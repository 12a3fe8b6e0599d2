use serde::Serialize;

use crate::core::{self, CollectionStats, Experience, Page};

/// Headline figures for the dashboard landing page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_trades: u64,
    pub total_reward: f64,
    pub win_rate: f64,
    pub healthy: bool,
}

impl Overview {
    /// Aggregates over the sampled episodes; `total_trades` still reflects
    /// the whole collection via the list envelope.
    pub fn compute(page: &Page<Experience>, healthy: bool) -> Self {
        Self {
            total_trades: page.total_items,
            total_reward: core::reward_total(&page.items),
            win_rate: core::win_rate(&page.items),
            healthy,
        }
    }

    pub fn offline() -> Self {
        Self {
            total_trades: 0,
            total_reward: 0.0,
            win_rate: 0.0,
            healthy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CollectionStats,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsResponse {
    pub fn available(stats: CollectionStats) -> Self {
        Self {
            stats,
            healthy: true,
            error: None,
        }
    }

    pub fn degraded(error: String) -> Self {
        Self {
            stats: CollectionStats::default(),
            healthy: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rewards: &[f64], total_items: u64) -> Page<Experience> {
        let items = rewards
            .iter()
            .map(|&reward| Experience {
                id: String::new(),
                symbol: "EUR_USD".into(),
                strategy: "ICC".into(),
                action: serde_json::Value::Null,
                reward,
                state: serde_json::Value::Null,
                next_state: serde_json::Value::Null,
                done: false,
                created: String::new(),
            })
            .collect();
        Page {
            page: 1,
            per_page: 200,
            total_items,
            total_pages: 1,
            items,
        }
    }

    #[test]
    fn overview_aggregates_the_sample() {
        let overview = Overview::compute(&page(&[10.0, -10.0, 15.0, 3.0], 120), true);
        assert_eq!(overview.total_trades, 120);
        assert_eq!(overview.total_reward, 18.0);
        assert_eq!(overview.win_rate, 75.0);
        assert!(overview.healthy);
    }

    #[test]
    fn overview_serializes_with_frontend_field_names() {
        let value = serde_json::to_value(Overview::compute(&page(&[], 0), false)).unwrap();
        assert!(value.get("totalTrades").is_some());
        assert!(value.get("totalReward").is_some());
        assert!(value.get("winRate").is_some());
    }

    #[test]
    fn stats_envelope_flattens_collection_stats() {
        let value = serde_json::to_value(StatsResponse::degraded("down".into())).unwrap();
        assert!(value.get("market_data").is_some());
        assert!(value.get("training_experiences").is_some());
        assert_eq!(value["healthy"], serde_json::json!(false));
        assert_eq!(value["error"], serde_json::json!("down"));
    }
}
