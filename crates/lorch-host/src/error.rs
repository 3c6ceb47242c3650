use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to launch process: {0}")]
    Launch(String),
    #[error("process exited with code {exit_code}: {stderr}")]
    ProcessExecution { exit_code: i32, stderr: String },
    #[error("could not parse identifier: {0}")]
    Parse(String),
    #[error("bootstrap failed: {message}")]
    Bootstrap {
        message: String,
        #[source]
        source: Option<Box<OrchestratorError>>,
    },
    #[error("provisioning failed after {attempts} attempt(s): {last}")]
    Provisioning {
        attempts: u32,
        #[source]
        last: Box<OrchestratorError>,
    },
    #[error("timed out waiting for the provisioning gate")]
    GateTimeout,
    #[error("match {0} has already been submitted")]
    DuplicateSubmission(String),
    #[error("cannot find chain/app mapping for match {0}")]
    Resolution(String),
    #[error("submission to ledger service failed: {0}")]
    SubmissionTransport(String),
    #[error("query to ledger service failed: {0}")]
    QueryTransport(String),
    #[error("failed to persist match mapping for {0}; leaderboard update skipped")]
    Persistence(String),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OrchestratorError {
    pub fn bootstrap(message: impl Into<String>) -> Self {
        OrchestratorError::Bootstrap {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a failed pipeline step.
    pub fn bootstrap_step(step: &str, cause: OrchestratorError) -> Self {
        OrchestratorError::Bootstrap {
            message: format!("{step}: {cause}"),
            source: Some(Box::new(cause)),
        }
    }

    /// Short machine-readable code used by the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Launch(_) => "launch_error",
            OrchestratorError::ProcessExecution { .. } => "process_error",
            OrchestratorError::Parse(_) => "parse_error",
            OrchestratorError::Bootstrap { .. } => "bootstrap_error",
            OrchestratorError::Provisioning { .. } => "provisioning_error",
            OrchestratorError::GateTimeout => "gate_timeout",
            OrchestratorError::DuplicateSubmission(_) => "duplicate_submission",
            OrchestratorError::Resolution(_) => "mapping_not_found",
            OrchestratorError::SubmissionTransport(_) => "submission_transport",
            OrchestratorError::QueryTransport(_) => "query_transport",
            OrchestratorError::Persistence(_) => "persistence_error",
            OrchestratorError::Task(_) => "task_error",
            OrchestratorError::Config(_) => "config_error",
            OrchestratorError::InvalidInput(_) => "invalid_request",
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
