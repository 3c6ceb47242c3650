//! Minimal GraphQL-over-HTTP client for the ledger query daemon.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const RECORD_SCORE_MUTATION: &str =
    "mutation recordScore($matchResult: MatchResultInput!) { recordScore(matchResult: $matchResult) }";

pub const LEADERBOARD_QUERY: &str =
    "query { leaderboard { userId score totalMatches totalWins totalLosses } }";

#[derive(Debug, Error)]
pub enum GraphqlError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Clone, Debug)]
pub struct GraphqlClient {
    client: Client,
    base_url: String,
}

impl GraphqlClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn application_url(&self, chain_id: &str, app_id: &str) -> String {
        format!("{}/chains/{chain_id}/applications/{app_id}", self.base_url)
    }

    /// POST `{query, variables}` and return the raw body of a 2xx response.
    /// `variables` of `None` is sent as an empty object.
    pub async fn post(
        &self,
        chain_id: &str,
        app_id: &str,
        query: &str,
        variables: Option<Value>,
        timeout: Duration,
    ) -> Result<String, GraphqlError> {
        let url = self.application_url(chain_id, app_id);
        let body = GraphqlRequest {
            query,
            variables: variables.unwrap_or_else(|| Value::Object(Default::default())),
        };
        debug!(%url, query, "graphql request");
        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GraphqlError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!(%url, body = %text, "graphql response");
        Ok(text)
    }
}

/// Escape a value for embedding inside a double-quoted GraphQL string.
pub fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `recordScore` mutation against the leaderboard application.
pub fn leaderboard_mutation(match_id: &str, user_id: &str, is_winner: bool) -> String {
    format!(
        "mutation {{ recordScore(matchId: \"{}\", userId: \"{}\", isWinner: {is_winner}) }}",
        escape_string(match_id),
        escape_string(user_id)
    )
}

/// Operation id from a mutation response: `data` as a string, or
/// `data.recordScore` as a string. Normalized to the first 64-hex token when
/// one is present.
pub fn operation_id(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let raw = match value.get("data")? {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("recordScore")?.as_str()?,
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    Some(crate::extract::first_hex64(raw).unwrap_or_else(|| raw.to_string()))
}
