//! Single-flight boundary around chain and application allocation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::ServiceControl;

/// Runs at most one allocation at a time. The query daemon is stopped for
/// the duration of the operation and restarted afterwards, whatever the
/// outcome.
#[derive(Clone)]
pub struct SingleFlightGate {
    permits: Arc<Semaphore>,
    stop_settle: Duration,
    restart_settle: Duration,
}

impl SingleFlightGate {
    pub fn new(stop_settle: Duration, restart_settle: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            stop_settle,
            restart_settle,
        }
    }

    /// Run `op` with the daemon suspended. Once the gate is acquired the
    /// whole sequence runs on its own task, so dropping the returned future
    /// neither cancels `op` nor leaves the daemon stopped.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        services: Arc<dyn ServiceControl>,
        acquire_timeout: Duration,
        op: F,
    ) -> OrchestratorResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = OrchestratorResult<T>> + Send + 'static,
    {
        let request_id = short_request_id();
        let acquire = self.permits.clone().acquire_owned();
        let permit = match tokio::time::timeout(acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            // closed semaphore is never observed; the gate owns it
            Ok(Err(_)) | Err(_) => {
                warn!(request_id, "gate busy; acquire timed out");
                return Err(OrchestratorError::GateTimeout);
            }
        };
        info!(request_id, "gate acquired");

        let (stop_settle, restart_settle) = (self.stop_settle, self.restart_settle);
        let task = tokio::spawn(async move {
            let _permit = permit;
            services.suspend().await;
            tokio::time::sleep(stop_settle).await;

            let outcome = tokio::spawn(op())
                .await
                .unwrap_or_else(|err| Err(OrchestratorError::Task(err.to_string())));
            if let Err(err) = &outcome {
                warn!(request_id, "gated operation failed: {err}");
            }

            match services.resume().await {
                Ok(pid) => info!(request_id, pid, "ledger service restarted"),
                Err(err) => warn!(request_id, "failed to restart ledger service: {err}"),
            }
            tokio::time::sleep(restart_settle).await;

            info!(request_id, ok = outcome.is_ok(), "gate released");
            outcome
        });
        task.await
            .unwrap_or_else(|err| Err(OrchestratorError::Task(err.to_string())))
    }
}

impl Default for SingleFlightGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_millis(500))
    }
}

fn short_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
