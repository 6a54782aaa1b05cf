//! Statistics collaborator client - posts finished match results

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::ws::protocol::{EndReason, GameMode, PlayerTally};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregated outcome of one room
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub room_id: Uuid,
    pub room_name: String,
    pub mode: GameMode,
    pub map_id: u32,
    pub reason: EndReason,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f32,
    pub players: Vec<PlayerTally>,
}

struct StatsEndpoint {
    client: Client,
    url: String,
    api_key: Option<String>,
}

/// Client for the statistics service. Disabled when no URL is configured.
#[derive(Clone)]
pub struct StatsClient {
    endpoint: Option<Arc<StatsEndpoint>>,
}

impl StatsClient {
    pub fn new(config: &Config) -> Self {
        match &config.stats_url {
            Some(url) => Self::with_endpoint(url.clone(), config.stats_api_key.clone()),
            None => Self::disabled(),
        }
    }

    pub fn with_endpoint(url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: Some(Arc::new(StatsEndpoint {
                client,
                url: url.trim_end_matches('/').to_string(),
                api_key,
            })),
        }
    }

    /// A client that accepts results and drops them
    pub fn disabled() -> Self {
        Self { endpoint: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// POST a match result to `{url}/matches`
    pub async fn record_match(&self, result: &MatchResult) -> Result<(), StatsError> {
        let Some(endpoint) = &self.endpoint else {
            debug!(room_id = %result.room_id, "Stats disabled, skipping match result");
            return Ok(());
        };

        let mut request = endpoint
            .client
            .post(format!("{}/matches", endpoint.url))
            .header("Content-Type", "application/json")
            .json(result);
        if let Some(key) = &endpoint.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(StatsError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StatsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            room_id = %result.room_id,
            players = result.players.len(),
            "Match result recorded"
        );
        Ok(())
    }
}

/// Statistics errors
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::Team;

    fn result() -> MatchResult {
        MatchResult {
            room_id: Uuid::new_v4(),
            room_name: "death_match-120000".into(),
            mode: GameMode::DeathMatch,
            map_id: 1,
            reason: EndReason::ScoreLimit,
            started_at: None,
            ended_at: Utc::now(),
            duration_secs: 42.0,
            players: vec![PlayerTally {
                player_id: 1,
                character_id: 2,
                team: Team::None,
                score: 20,
                kills: 20,
                deaths: 3,
                assists: 1,
            }],
        }
    }

    #[tokio::test]
    async fn disabled_client_accepts_results() {
        let client = StatsClient::disabled();
        assert!(!client.is_enabled());
        assert!(client.record_match(&result()).await.is_ok());
    }

    #[test]
    fn result_serializes_wire_names() {
        let value = serde_json::to_value(result()).unwrap();
        assert_eq!(value["mode"], "death_match");
        assert_eq!(value["reason"], "score_limit");
        assert_eq!(value["players"][0]["kills"], 20);
    }

    #[test]
    fn endpoint_url_is_normalized() {
        let client = StatsClient::with_endpoint("http://stats.local/".into(), None);
        assert!(client.is_enabled());
        assert_eq!(client.endpoint.as_ref().unwrap().url, "http://stats.local");
    }
}
