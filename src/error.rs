//! Error types for Fleet Pilot.

use crate::job::stage::Stage;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("No accounts loaded for run")]
    NoAccounts,
}

/// Remote automation client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("API returned {code:?}: {msg}")]
    Api {
        code: crate::client::ApiCode,
        msg: String,
    },

    #[error("Failed to decode API response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The API code carried by this error, if any.
    pub fn api_code(&self) -> Option<crate::client::ApiCode> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised while executing a single stage of a device job.
///
/// The state machine classifies these into retry / restart / fixed-sleep /
/// permanent outcomes (see `machine.rs`).
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The device is not running; the machine restarts from `StartDevice`
    /// without consuming any stage retry budget.
    #[error("Device is not running")]
    DeviceNotRunning,

    /// The target app is missing; the machine routes back to `InstallApp`.
    #[error("App is not installed")]
    AppNotInstalled,

    /// Remote API rate limit; fixed sleep, no budget consumed.
    #[error("Rate limited by remote API")]
    RateLimited,

    /// Too many concurrent remote tasks; longer fixed sleep, no budget consumed.
    #[error("Too many concurrent remote tasks")]
    TooManyConcurrent,

    /// Transient failure; retried with backoff while budget remains.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Login reported success but did not survive re-verification.
    #[error("Login could not be verified: {0}")]
    LoginNotVerified(String),

    /// Unrecoverable failure; the job transitions to `Failed`.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Retries exhausted in stage {stage} after {attempts} attempts")]
    RetriesExhausted { stage: Stage, attempts: u32 },

    #[error("Stage {stage} requires a remote flow binding but none is configured")]
    MissingFlowBinding { stage: Stage },

    #[error("All {tried} candidate usernames were rejected")]
    UsernamesExhausted { tried: usize },

    /// The run was cancelled; handlers unwind without failing the job.
    #[error("Run cancelled")]
    Cancelled,
}

impl StageError {
    /// Map a client error onto the stage-level classification.
    pub fn from_client(err: ClientError) -> Self {
        use crate::client::ApiCode;

        match err.api_code() {
            Some(ApiCode::DeviceNotRunning) => Self::DeviceNotRunning,
            Some(ApiCode::AppNotInstalled) => Self::AppNotInstalled,
            Some(ApiCode::RateLimited) => Self::RateLimited,
            Some(ApiCode::TooManyConcurrent) => Self::TooManyConcurrent,
            _ => Self::Transient(err.to_string()),
        }
    }

    /// Whether this error is terminal regardless of remaining retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Permanent(_)
                | Self::RetriesExhausted { .. }
                | Self::MissingFlowBinding { .. }
                | Self::UsernamesExhausted { .. }
        )
    }
}

impl From<ClientError> for StageError {
    fn from(err: ClientError) -> Self {
        Self::from_client(err)
    }
}

/// Job bookkeeping errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Run is already active")]
    RunActive,
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
