use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Result of one match, forwarded verbatim as the `matchResult` variable of
/// the session application's `recordScore` mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchResult {
    pub match_id: String,
    pub player1_username: String,
    pub player2_username: String,
    pub winner_username: String,
    pub loser_username: String,
    pub duration_seconds: i64,
    /// Unix seconds.
    pub timestamp: i64,
    pub player1_score: i64,
    pub player2_score: i64,
    pub map_name: String,
    pub match_type: String,
}

impl MatchResult {
    /// Winner for leaderboard accounting, falling back to player 1.
    pub fn leaderboard_winner(&self) -> Option<&str> {
        first_non_blank([&self.winner_username, &self.player1_username])
    }

    /// Loser for leaderboard accounting, falling back to player 2.
    pub fn leaderboard_loser(&self) -> Option<&str> {
        first_non_blank([&self.loser_username, &self.player2_username])
    }
}

fn first_non_blank<'a>(candidates: [&'a String; 2]) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(String::as_str)
        .find(|s| !s.trim().is_empty())
}

/// A decoded `submit-match-result` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub chain_id: Option<String>,
    pub app_id: Option<String>,
    pub match_result: MatchResult,
}

impl Submission {
    /// Decode a client payload. Accepts a nested `matchResult` object or the
    /// flat legacy `{player, score, matchId}` shape, with PascalCase or
    /// camelCase keys and integers given as strings. A missing match id gets
    /// a fresh UUID; a zero timestamp becomes the current time.
    pub fn from_payload(payload: &Value) -> OrchestratorResult<Self> {
        let Value::Object(root) = payload else {
            return Err(OrchestratorError::InvalidInput("empty or invalid body".into()));
        };
        let chain_id = non_empty(first_string(root, &["chainId", "ChainId"]));
        let app_id = non_empty(first_string(root, &["appId", "AppId"]));
        let now = Utc::now().timestamp();

        let mut match_result = match root.get("matchResult") {
            Some(Value::Object(m)) => {
                let mut result = MatchResult {
                    match_id: first_string(m, &["MatchId", "matchId"]),
                    player1_username: first_string(
                        m,
                        &["Player1Username", "player1Username", "player", "Player"],
                    ),
                    player2_username: first_string(m, &["Player2Username", "player2Username"]),
                    winner_username: first_string(m, &["WinnerUsername", "winnerUsername"]),
                    loser_username: first_string(m, &["LoserUsername", "loserUsername"]),
                    duration_seconds: first_int(m, &["DurationSeconds", "durationSeconds"]),
                    timestamp: first_int(m, &["Timestamp", "timestamp"]),
                    player1_score: first_int(m, &["Player1Score", "player1Score", "score"]),
                    player2_score: first_int(m, &["Player2Score", "player2Score"]),
                    map_name: first_string(m, &["MapName", "mapName"]),
                    match_type: first_string(m, &["MatchType", "matchType"]),
                };
                if result.timestamp == 0 {
                    result.timestamp = now;
                }
                result
            }
            _ => {
                let player = first_string(root, &["player", "Player"]);
                MatchResult {
                    match_id: first_string(root, &["matchId", "MatchId"]),
                    player1_username: player.clone(),
                    winner_username: player,
                    player1_score: first_int(root, &["score", "Score"]),
                    timestamp: now,
                    ..MatchResult::default()
                }
            }
        };
        if match_result.match_id.trim().is_empty() {
            match_result.match_id = Uuid::new_v4().to_string();
        }
        Ok(Self {
            chain_id,
            app_id,
            match_result,
        })
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| obj.get(*k)?.as_str())
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

fn first_int(obj: &Map<String, Value>, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|k| match obj.get(*k)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_payload_with_mixed_case_keys() {
        let payload = json!({
            "ChainId": "chain",
            "appId": "app",
            "matchResult": {
                "MatchId": "m1",
                "player1Username": "alice",
                "Player2Username": "bob",
                "winnerUsername": "alice",
                "player1Score": "12",
                "Player2Score": 7,
                "timestamp": 1700000000,
                "mapName": "dojo"
            }
        });
        let sub = Submission::from_payload(&payload).unwrap();
        assert_eq!(sub.chain_id.as_deref(), Some("chain"));
        assert_eq!(sub.app_id.as_deref(), Some("app"));
        let m = sub.match_result;
        assert_eq!(m.match_id, "m1");
        assert_eq!(m.player1_username, "alice");
        assert_eq!(m.player2_username, "bob");
        assert_eq!(m.player1_score, 12);
        assert_eq!(m.player2_score, 7);
        assert_eq!(m.timestamp, 1_700_000_000);
        assert_eq!(m.map_name, "dojo");
        assert_eq!(m.leaderboard_loser(), Some("bob"));
    }

    #[test]
    fn nested_payload_fills_missing_id_and_timestamp() {
        let before = Utc::now().timestamp();
        let sub = Submission::from_payload(&json!({"matchResult": {"player": "solo"}})).unwrap();
        let m = sub.match_result;
        assert!(Uuid::parse_str(&m.match_id).is_ok());
        assert!(m.timestamp >= before);
        assert_eq!(m.player1_username, "solo");
        assert_eq!(m.leaderboard_winner(), Some("solo"));
        assert_eq!(m.leaderboard_loser(), None);
        assert!(sub.chain_id.is_none());
    }

    #[test]
    fn flat_legacy_shape() {
        let sub = Submission::from_payload(&json!({
            "chainId": "",
            "Player": "carol",
            "score": "40",
            "matchId": "legacy-1"
        }))
        .unwrap();
        assert!(sub.chain_id.is_none());
        let m = sub.match_result;
        assert_eq!(m.match_id, "legacy-1");
        assert_eq!(m.player1_username, "carol");
        assert_eq!(m.winner_username, "carol");
        assert_eq!(m.player1_score, 40);
        assert!(m.timestamp > 0);
    }

    #[test]
    fn non_object_body_is_rejected() {
        for body in [json!(null), json!([1, 2]), json!("text")] {
            assert!(matches!(
                Submission::from_payload(&body),
                Err(OrchestratorError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn serializes_camel_case_for_graphql() {
        let value = serde_json::to_value(MatchResult {
            match_id: "m".into(),
            player1_score: 3,
            ..MatchResult::default()
        })
        .unwrap();
        assert_eq!(value["matchId"], "m");
        assert_eq!(value["player1Score"], 3);
        assert_eq!(value["player1Username"], "");
    }
}
