//! Remote automation client: capability trait and wire types.
//!
//! The orchestrator core only ever talks to `AutomationClient`; the concrete
//! transport lives in `http.rs` and tests script their own implementation.

mod http;

pub use http::HttpClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Response codes in the remote API's uniform `{code, msg, data}` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCode {
    Success,
    DeviceNotRunning,
    AppAlreadyInstalling,
    AppAlreadyHigherVersion,
    AppNotInstalled,
    RateLimited,
    TooManyConcurrent,
    Other(i32),
}

impl ApiCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            40001 => Self::DeviceNotRunning,
            40002 => Self::AppAlreadyInstalling,
            40003 => Self::AppAlreadyHigherVersion,
            40004 => Self::AppNotInstalled,
            42901 => Self::RateLimited,
            42902 => Self::TooManyConcurrent,
            other => Self::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Uniform response envelope returned by every remote call.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the happy path, mapping non-success codes to `ClientError::Api`.
    pub fn into_data(self) -> Result<Option<T>, ClientError> {
        let code = ApiCode::from_code(self.code);
        if code.is_success() {
            Ok(self.data)
        } else {
            Err(ClientError::Api { code, msg: self.msg })
        }
    }
}

/// A remotely hosted device emulator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub serial: String,
}

/// Reported device power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Starting,
    Running,
    Stopped,
    Unknown,
}

/// Terminal and non-terminal statuses of a remote RPA task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a remote task, as returned by `query_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub status: TaskStatus,
    #[serde(default)]
    pub fail_desc: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
}

impl TaskInfo {
    /// A task is only trusted as succeeded when it completed with no embedded
    /// failure description. Remote flows can report "completed" while the
    /// action underneath silently failed.
    pub fn is_clean_success(&self) -> bool {
        self.status == TaskStatus::Completed
            && self.fail_desc.as_deref().map_or(true, |d| d.trim().is_empty())
    }
}

/// Outcome of an install request; the success-equivalent remote codes are
/// folded in here so callers see one happy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalling,
    AlreadyHigherVersion,
}

/// Screenshot retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub download_link: Option<String>,
}

/// Semantic kinds of remote action the core creates tasks for.
///
/// Keys the per-job pending-task map and the configured flow-id bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Login,
    VerifySession,
    SetAvatar,
    SetBio,
    PublishPost,
    Highlight,
    SetPrivate,
    EnableTwoFactor,
    Rename,
    Browse,
    CustomFlow,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Login => "login",
            Self::VerifySession => "verify_session",
            Self::SetAvatar => "set_avatar",
            Self::SetBio => "set_bio",
            Self::PublishPost => "publish_post",
            Self::Highlight => "highlight",
            Self::SetPrivate => "set_private",
            Self::EnableTwoFactor => "enable_two_factor",
            Self::Rename => "rename",
            Self::Browse => "browse",
            Self::CustomFlow => "custom_flow",
        };
        write!(f, "{s}")
    }
}

/// Capability set consumed from the remote automation API.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    async fn list_devices(&self, group: &str) -> Result<Vec<Device>, ClientError>;

    async fn start_device(&self, device_id: &str) -> Result<(), ClientError>;

    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, ClientError>;

    async fn stop_device(&self, device_id: &str) -> Result<(), ClientError>;

    async fn stop_devices(&self, device_ids: &[String]) -> Result<(), ClientError>;

    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), ClientError>;

    async fn install_app(
        &self,
        device_id: &str,
        version_ref: &str,
    ) -> Result<InstallOutcome, ClientError>;

    async fn start_app(&self, device_id: &str, app_ref: &str) -> Result<(), ClientError>;

    /// Create an asynchronous RPA task bound to a remote flow; returns the
    /// remote task id. Creation is at-least-once: a retried attempt may
    /// create a duplicate remote action.
    async fn create_task(
        &self,
        device_id: &str,
        flow_id: &str,
        name: &str,
        params: serde_json::Value,
    ) -> Result<String, ClientError>;

    async fn query_task(&self, task_id: &str) -> Result<TaskInfo, ClientError>;

    async fn request_screenshot(&self, device_id: &str) -> Result<String, ClientError>;

    async fn screenshot_result(&self, task_id: &str) -> Result<ScreenshotResult, ClientError>;

    /// Delete externally uploaded media tracked by a finished run.
    async fn delete_media(&self, media_ids: &[String]) -> Result<(), ClientError>;
}
