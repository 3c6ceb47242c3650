//! Idempotent forwarding of match results to the ledger service.
//!
//! The mapping store is the authority on whether a match was already
//! accepted. A submission claims the key first, then talks to the network,
//! then records the outcome; leaderboard accounting runs only once the
//! outcome is durable.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use lorch_store::MatchMappingStore;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cli::SharedProvisioned;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::graphql::{
    GraphqlClient, LEADERBOARD_QUERY, RECORD_SCORE_MUTATION, leaderboard_mutation, operation_id,
};
use crate::model::MatchResult;
use crate::services::ServiceControl;

pub struct SubmissionCoordinator {
    store: Arc<MatchMappingStore>,
    services: Arc<dyn ServiceControl>,
    graphql: GraphqlClient,
    provisioned: SharedProvisioned,
    publisher_chain: String,
    leaderboard_timeout: Duration,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<MatchMappingStore>,
        services: Arc<dyn ServiceControl>,
        graphql: GraphqlClient,
        provisioned: SharedProvisioned,
        publisher_chain: impl Into<String>,
        leaderboard_timeout: Duration,
    ) -> Self {
        Self {
            store,
            services,
            graphql,
            provisioned,
            publisher_chain: publisher_chain.into(),
            leaderboard_timeout,
        }
    }

    /// Submit `result` to the session application. Without an explicit
    /// chain/app pair the target is looked up by match id.
    pub async fn submit(
        &self,
        chain_id: Option<&str>,
        app_id: Option<&str>,
        result: &MatchResult,
        timeout: Duration,
    ) -> OrchestratorResult<String> {
        let key = result.match_id.trim();
        if key.is_empty() {
            return Err(OrchestratorError::InvalidInput("matchId required".into()));
        }

        let (chain_id, app_id) = match (non_blank(chain_id), non_blank(app_id)) {
            (Some(chain), Some(app)) => (chain.to_string(), app.to_string()),
            _ => {
                let mapping = self
                    .store
                    .get(key)
                    .ok_or_else(|| OrchestratorError::Resolution(key.to_string()))?;
                info!(match_id = key, chain_id = %mapping.chain_id, app_id = %mapping.app_id, "resolved match mapping");
                (mapping.chain_id, mapping.app_id)
            }
        };

        if !self.store.try_begin_submission(key, &chain_id, &app_id) {
            return Err(OrchestratorError::DuplicateSubmission(key.to_string()));
        }
        // Every exit below, including the caller dropping this future, fails
        // the claim unless the outcome was recorded.
        let claim = Claim::new(&self.store, key);

        self.services.ensure_service().await?;

        let variables = json!({ "matchResult": result });
        debug!(match_id = key, %variables, "submitting match result");
        let body = self
            .graphql
            .post(&chain_id, &app_id, RECORD_SCORE_MUTATION, Some(variables), timeout)
            .await
            .map_err(|err| OrchestratorError::SubmissionTransport(err.to_string()))?;

        let op_id = operation_id(&body);
        if op_id.is_none() {
            debug!(match_id = key, "no operation id in response");
        }
        if !self.store.complete_submission(key, op_id.as_deref()) {
            return Err(OrchestratorError::Persistence(key.to_string()));
        }
        claim.settle();
        info!(match_id = key, op_id = op_id.as_deref().unwrap_or("-"), "match result submitted");

        self.record_leaderboard(result).await;
        Ok(body)
    }

    /// Read the leaderboard of `app_id` on `chain_id`.
    pub async fn fetch(
        &self,
        chain_id: &str,
        app_id: &str,
        timeout: Duration,
    ) -> OrchestratorResult<String> {
        let (Some(chain_id), Some(app_id)) = (non_blank(Some(chain_id)), non_blank(Some(app_id)))
        else {
            return Err(OrchestratorError::InvalidInput("chainId and appId required".into()));
        };
        self.services.ensure_service().await?;
        self.graphql
            .post(chain_id, app_id, LEADERBOARD_QUERY, None, timeout)
            .await
            .map_err(|err| OrchestratorError::QueryTransport(err.to_string()))
    }

    async fn record_leaderboard(&self, result: &MatchResult) {
        let leaderboard = self.provisioned.read().await.leaderboard_app_id.clone();
        let Some(leaderboard) = leaderboard.filter(|id| !id.trim().is_empty()) else {
            debug!("no leaderboard application; skipping accounting");
            return;
        };

        let mutations: Vec<String> = [
            result.leaderboard_winner().map(|u| (u, true)),
            result.leaderboard_loser().map(|u| (u, false)),
        ]
        .into_iter()
        .flatten()
        .map(|(user, is_winner)| leaderboard_mutation(&result.match_id, user, is_winner))
        .collect();

        let calls = mutations.iter().map(|mutation| {
            self.graphql.post(
                &self.publisher_chain,
                &leaderboard,
                mutation,
                None,
                self.leaderboard_timeout,
            )
        });
        for (idx, outcome) in join_all(calls).await.into_iter().enumerate() {
            match outcome {
                Ok(body) => debug!(idx, %body, "leaderboard mutation applied"),
                Err(err) => warn!(idx, match_id = %result.match_id, "leaderboard update failed: {err}"),
            }
        }
    }
}

/// A claimed submission that has not been recorded yet. Dropping it marks the
/// key failed so the match can be submitted again.
struct Claim<'a> {
    store: &'a MatchMappingStore,
    key: &'a str,
    settled: bool,
}

impl<'a> Claim<'a> {
    fn new(store: &'a MatchMappingStore, key: &'a str) -> Self {
        Self {
            store,
            key,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(match_id = self.key, "submission not recorded; releasing claim");
            self.store.fail_submission(self.key);
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
