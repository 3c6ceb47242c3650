//! Opening per-match chains and instantiating the session application on them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cli::{CliRunner, argv};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::extract::{APP_ID_STRATEGIES, CHAIN_ID_STRATEGIES, all_hex64, extract, is_hex64};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Clone)]
pub struct ChainAppFactory {
    cli: Arc<dyn CliRunner>,
    /// Pause before each allocating CLI call.
    pause: Duration,
}

impl ChainAppFactory {
    pub fn new(cli: Arc<dyn CliRunner>, pause: Duration) -> Self {
        Self { cli, pause }
    }

    /// Open a new chain and return its id.
    pub async fn open_chain(&self) -> OrchestratorResult<String> {
        info!("opening match chain");
        tokio::time::sleep(self.pause).await;
        let output = self.cli.run(&argv(["open-chain"])).await?;
        if output.trim().is_empty() {
            return Err(OrchestratorError::Parse("open-chain returned no output".into()));
        }
        extract(&output, CHAIN_ID_STRATEGIES).ok_or_else(|| {
            OrchestratorError::Parse(format!(
                "failed to parse chain id from open-chain output. Raw: {}",
                output.trim()
            ))
        })
    }

    /// Canonical chain id for `candidate`: itself if it is a full id,
    /// otherwise the first chain listed by the wallet.
    pub async fn resolve_chain(&self, candidate: &str) -> OrchestratorResult<String> {
        let candidate = candidate.trim();
        if is_hex64(candidate) {
            return Ok(candidate.to_ascii_lowercase());
        }
        let chains = match self.cli.run(&argv(["wallet", "show"])).await {
            Ok(text) => all_hex64(&text),
            Err(err) => {
                warn!("'wallet show' failed: {err}");
                Vec::new()
            }
        };
        chains
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::Parse("no chain ids found in wallet".into()))
    }

    /// Create an application from `module_id` on the resolved chain, retrying
    /// while the freshly opened chain propagates.
    pub async fn create_app(
        &self,
        module_id: &str,
        chain_candidate: &str,
        constructor_arg: &serde_json::Value,
        retry: &RetryPolicy,
    ) -> OrchestratorResult<String> {
        if module_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("moduleId required".into()));
        }
        if chain_candidate.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("chainId required".into()));
        }
        let chain_id = self.resolve_chain(chain_candidate).await?;
        let json_arg = constructor_arg.to_string();
        let attempts = retry.max_retries.max(1);

        let mut last = None;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.pause).await;
            info!(attempt, attempts, module_id, chain_id = %chain_id, "creating application");
            match self.create_once(module_id, &chain_id, &json_arg).await {
                Ok(app_id) => {
                    info!(chain_id = %chain_id, app_id = %app_id, "application created");
                    return Ok(app_id);
                }
                Err(err) => {
                    warn!(attempt, "create-application failed: {err}");
                    last = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(retry.retry_delay).await;
                    }
                }
            }
        }
        Err(OrchestratorError::Provisioning {
            attempts,
            last: Box::new(last.unwrap_or_else(|| {
                OrchestratorError::Parse("create-application never ran".into())
            })),
        })
    }

    async fn create_once(
        &self,
        module_id: &str,
        chain_id: &str,
        json_arg: &str,
    ) -> OrchestratorResult<String> {
        let output = self
            .cli
            .run(&argv([
                "create-application",
                module_id,
                chain_id,
                "--json-argument",
                json_arg,
            ]))
            .await?;
        if output.trim().is_empty() {
            return Err(OrchestratorError::Parse(
                "create-application returned empty output".into(),
            ));
        }
        extract(&output, APP_ID_STRATEGIES).ok_or_else(|| {
            OrchestratorError::Parse(format!(
                "could not parse app id from create-application output. Raw: {}",
                output.trim()
            ))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned results per subcommand and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedCli {
        responses: Mutex<Vec<(String, VecDeque<OrchestratorResult<String>>)>>,
        pub(crate) calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedCli {
        pub(crate) fn on(self, subcommand: &str, result: OrchestratorResult<String>) -> Self {
            {
                let mut responses = self.responses.lock().unwrap();
                match responses.iter_mut().find(|(name, _)| name == subcommand) {
                    Some((_, queue)) => queue.push_back(result),
                    None => responses.push((subcommand.to_string(), VecDeque::from([result]))),
                }
            }
            self
        }

        pub(crate) fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|args| args.first().map(String::as_str) == Some(subcommand))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl CliRunner for ScriptedCli {
        async fn run(&self, args: &[String]) -> OrchestratorResult<String> {
            self.calls.lock().unwrap().push(args.to_vec());
            let name = args.first().cloned().unwrap_or_default();
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .iter_mut()
                .find(|(n, _)| *n == name)
                .map(|(_, q)| q)
                .unwrap_or_else(|| panic!("unexpected cli call {args:?}"));
            queue
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response left for {name}"))
        }
    }

    pub(crate) fn exit_err(code: i32, stderr: &str) -> OrchestratorError {
        OrchestratorError::ProcessExecution {
            exit_code: code,
            stderr: stderr.into(),
        }
    }

    fn factory(cli: ScriptedCli) -> (Arc<ScriptedCli>, ChainAppFactory) {
        let cli = Arc::new(cli);
        (cli.clone(), ChainAppFactory::new(cli, Duration::ZERO))
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn open_chain_parses_embedded_id() {
        let chain = "aa".repeat(32);
        let (_, factory) = factory(ScriptedCli::default().on(
            "open-chain",
            Ok(format!("INFO opening\n{chain}\nINFO done in 812ms\n")),
        ));
        assert_eq!(factory.open_chain().await.unwrap(), chain);
    }

    #[tokio::test]
    async fn open_chain_without_id_is_parse_error() {
        let (_, factory) = factory(
            ScriptedCli::default()
                .on("open-chain", Ok("something went sideways\n".into()))
                .on("open-chain", Ok("   \n".into())),
        );
        assert!(matches!(factory.open_chain().await, Err(OrchestratorError::Parse(_))));
        assert!(matches!(factory.open_chain().await, Err(OrchestratorError::Parse(_))));
    }

    #[tokio::test]
    async fn create_app_recovers_after_transient_failures() {
        let chain = "bb".repeat(32);
        let (cli, factory) = factory(
            ScriptedCli::default()
                .on("create-application", Err(exit_err(1, "chain not yet known")))
                .on("create-application", Err(exit_err(1, "chain not yet known")))
                .on("create-application", Ok("log line\nnew-app-id\n".into())),
        );
        let app = factory
            .create_app("module-1", &chain, &serde_json::json!({"leaderboard": "lb"}), &fast_retry(5))
            .await
            .expect("third attempt succeeds");
        assert_eq!(app, "new-app-id");

        let calls = cli.calls_to("create-application");
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            argv([
                "create-application",
                "module-1",
                chain.as_str(),
                "--json-argument",
                r#"{"leaderboard":"lb"}"#,
            ])
        );
        assert!(cli.calls_to("wallet").is_empty());
    }

    #[tokio::test]
    async fn create_app_exhaustion_carries_last_error() {
        let chain = "cc".repeat(32);
        let (cli, factory) = factory(
            ScriptedCli::default()
                .on("create-application", Err(exit_err(1, "first")))
                .on("create-application", Err(exit_err(2, "second"))),
        );
        let err = factory
            .create_app("m", &chain, &serde_json::Value::Null, &fast_retry(2))
            .await
            .expect_err("exhausted");
        match err {
            OrchestratorError::Provisioning { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    *last,
                    OrchestratorError::ProcessExecution { exit_code: 2, .. }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cli.calls_to("create-application").len(), 2);
    }

    #[tokio::test]
    async fn partial_chain_resolves_through_wallet() {
        let default_chain = "dd".repeat(32);
        let other = "EE".repeat(32);
        let (cli, factory) = factory(
            ScriptedCli::default()
                .on(
                    "wallet",
                    Ok(format!("Chain ID: {default_chain}\n  default\nChain ID: {other}\n")),
                )
                .on("create-application", Ok("app-x\n".into())),
        );
        let app = factory
            .create_app("m", "dd", &serde_json::Value::Null, &fast_retry(1))
            .await
            .unwrap();
        assert_eq!(app, "app-x");
        assert_eq!(cli.calls_to("create-application")[0][2], default_chain);
    }

    #[tokio::test]
    async fn empty_wallet_fails_resolution() {
        let (_, factory) = factory(ScriptedCli::default().on("wallet", Ok("no chains\n".into())));
        assert!(matches!(
            factory.resolve_chain("partial").await,
            Err(OrchestratorError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn full_chain_id_is_lowercased_without_wallet_lookup() {
        let (cli, factory) = factory(ScriptedCli::default());
        let resolved = factory.resolve_chain(&"AB".repeat(32)).await.unwrap();
        assert_eq!(resolved, "ab".repeat(32));
        assert!(cli.calls.lock().unwrap().is_empty());
    }
}
