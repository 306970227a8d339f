//! Workflow strategies.
//!
//! A strategy is the stateless definition of a workflow's stage graph: which
//! stages follow the shared bootstrap, which are retryable, and how each one
//! talks to the remote API. Any per-job scratch a strategy needs (post index,
//! username-retry state) lives on `DeviceJob`, never inside the strategy, so
//! one instance is safely shared across concurrent jobs.

mod custom;
mod post;
mod profile;
mod rename;
pub mod username;
mod warmup;

pub use custom::CustomStrategy;
pub(crate) use custom::resolve_param;
pub use post::PostStrategy;
pub use profile::ProfileSetupStrategy;
pub use rename::RenameStrategy;
pub use warmup::WarmupStrategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::account::AccountRecord;
use crate::client::{ActionKind, AutomationClient, TaskInfo};
use crate::config::RunConfig;
use crate::error::StageError;
use crate::events::{EventSender, LogLevel};
use crate::job::stage::Stage;
use crate::job::DeviceJob;
use crate::poll::{self, PollOutcome};
use crate::retry::sleep_cancellable;

/// Closed set of workflow kinds. Adding or removing one is a compile-time
/// checked change: `strategy_for` matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Warmup,
    ProfileSetup,
    Rename,
    Post,
    CommunityPost,
    Custom,
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warmup" => Ok(Self::Warmup),
            "profile_setup" => Ok(Self::ProfileSetup),
            "rename" => Ok(Self::Rename),
            "post" => Ok(Self::Post),
            "community_post" => Ok(Self::CommunityPost),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown workflow kind: {other}")),
        }
    }
}

/// Resolve a workflow kind to its strategy implementation.
pub fn strategy_for(kind: WorkflowKind, config: &RunConfig) -> Arc<dyn WorkflowStrategy> {
    match kind {
        WorkflowKind::Warmup => Arc::new(WarmupStrategy),
        WorkflowKind::ProfileSetup => Arc::new(ProfileSetupStrategy),
        WorkflowKind::Rename => Arc::new(RenameStrategy),
        WorkflowKind::Post => Arc::new(PostStrategy::content_only()),
        WorkflowKind::CommunityPost => Arc::new(PostStrategy::community()),
        WorkflowKind::Custom => Arc::new(CustomStrategy::from_config(config)),
    }
}

/// Everything a stage handler may touch.
pub struct StageContext<'a> {
    pub job: &'a mut DeviceJob,
    pub config: &'a RunConfig,
    pub client: &'a Arc<dyn AutomationClient>,
    pub events: &'a EventSender,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The job's account, or a permanent error when none was assigned.
    pub fn account(&self) -> Result<&AccountRecord, StageError> {
        self.job
            .account
            .as_ref()
            .ok_or_else(|| StageError::Permanent("no account assigned to device".into()))
    }

    /// Cancellable sleep; surfaces cancellation as `StageError::Cancelled`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StageError> {
        if sleep_cancellable(duration, self.cancel).await {
            Ok(())
        } else {
            Err(StageError::Cancelled)
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.events
            .log(level, Some(&self.job.device_name), Some(self.job.stage), message);
    }

    /// Create a remote task for an action, looking up its flow binding.
    /// A missing binding is a permanent configuration error.
    pub async fn create_flow_task(
        &mut self,
        action: ActionKind,
        name: &str,
        params: serde_json::Value,
    ) -> Result<String, StageError> {
        let flow_id = self
            .config
            .flow_id(action)
            .ok_or(StageError::MissingFlowBinding {
                stage: self.job.stage,
            })?
            .to_string();
        self.create_task_with_flow(action, &flow_id, name, params).await
    }

    /// Create a remote task with an explicit flow id (custom workflow path).
    pub async fn create_task_with_flow(
        &mut self,
        action: ActionKind,
        flow_id: &str,
        name: &str,
        params: serde_json::Value,
    ) -> Result<String, StageError> {
        let task_id = self
            .client
            .create_task(&self.job.device_id, flow_id, name, params)
            .await?;
        self.job.track_task(action, task_id.clone());
        Ok(task_id)
    }

    /// Poll a task to termination with the current stage's timeout, mapping
    /// outcomes onto stage errors. A `completed` status carrying a failure
    /// description is a failure.
    pub async fn poll(&self, task_id: &str) -> Result<TaskInfo, StageError> {
        let outcome = poll::poll_task(
            self.client,
            task_id,
            self.config.poll_interval,
            self.config.stage_timeout(self.job.stage),
            self.cancel,
        )
        .await?;
        self.map_outcome(task_id, outcome)
    }

    /// Poll variant that captures periodic screenshot evidence.
    pub async fn poll_with_screenshots(&self, task_id: &str) -> Result<TaskInfo, StageError> {
        let outcome = poll::poll_task_with_screenshots(
            self.client,
            task_id,
            &self.job.device_id,
            &self.job.device_name,
            self.config.poll_interval,
            self.config.stage_timeout(self.job.stage),
            self.cancel,
            self.events,
        )
        .await?;
        self.map_outcome(task_id, outcome)
    }

    fn map_outcome(&self, task_id: &str, outcome: PollOutcome) -> Result<TaskInfo, StageError> {
        match outcome {
            PollOutcome::Completed(info) if info.is_clean_success() => Ok(info),
            PollOutcome::Completed(info) => Err(StageError::Transient(format!(
                "task {task_id} completed with failure: {}",
                info.fail_desc.unwrap_or_default()
            ))),
            PollOutcome::Failed(info) => Err(StageError::Transient(format!(
                "task {task_id} failed: {}",
                info.fail_desc.unwrap_or_else(|| "no description".into())
            ))),
            PollOutcome::CancelledRemote(_) => Err(StageError::Permanent(format!(
                "task {task_id} was cancelled remotely"
            ))),
            PollOutcome::CancelledLocal => Err(StageError::Cancelled),
            PollOutcome::TimedOut => Err(StageError::Transient(format!(
                "task {task_id} timed out"
            ))),
        }
    }

    /// Create a flow task and poll it to clean completion.
    pub async fn run_flow(
        &mut self,
        action: ActionKind,
        name: &str,
        params: serde_json::Value,
    ) -> Result<TaskInfo, StageError> {
        let task_id = self.create_flow_task(action, name, params).await?;
        self.poll(&task_id).await
    }

    /// Request a screenshot, track it on the job, and resolve the link in
    /// the background.
    pub async fn capture_screenshot(&mut self) -> Result<(), StageError> {
        let task_id = self.client.request_screenshot(&self.job.device_id).await?;
        self.job.track_screenshot(task_id.clone());
        poll::spawn_resolve(self.client, self.events, &self.job.device_name, &task_id);
        Ok(())
    }
}

/// Stateless definition of a workflow's stage graph.
#[async_trait]
pub trait WorkflowStrategy: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Whether the shared bootstrap must authenticate before handing over.
    fn requires_login(&self) -> bool {
        true
    }

    /// First workflow stage after the bootstrap, given the job's payload.
    fn first_stage(&self, job: &DeviceJob) -> Stage;

    /// Whether errors in this stage may consume retry budget. Errors in a
    /// non-retryable stage always escalate to permanent.
    fn is_retryable(&self, stage: Stage) -> bool;

    /// Number of progress steps this workflow adds after the bootstrap.
    fn total_steps(&self) -> u32;

    /// 1-based step number of a workflow stage, relative to the workflow.
    fn step_number(&self, stage: Stage) -> Option<u32>;

    /// Execute one stage; returns the next stage on success.
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError>;
}
