//! Run configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::account::WarmupIntensity;
use crate::client::ActionKind;
use crate::job::stage::Stage;
use crate::strategy::WorkflowKind;

/// Social platform the fleet is automating.
///
/// The display-name convention stamped onto devices is `"{username} {Platform}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum Platform {
    #[default]
    Instagram,
    TikTok,
    Threads,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Instagram => "Instagram",
            Self::TikTok => "TikTok",
            Self::Threads => "Threads",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "threads" => Ok(Self::Threads),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// A user-configured remote flow with its declared parameter names.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomFlow {
    pub flow_id: String,
    #[serde(default)]
    pub param_names: Vec<String>,
}

/// One user-selected stage of the custom workflow, in user order.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomStageSpec {
    pub name: String,
    pub flow_id: String,
    #[serde(default)]
    pub param_names: Vec<String>,
}

/// Enforced timeout floors for known-slow stages. Overrides below the floor
/// are clamped up to avoid false timeouts on inherently slow remote work.
const LOGIN_TIMEOUT_FLOOR: Duration = Duration::from_secs(300);
const WARMUP_TIMEOUT_FLOOR: Duration = Duration::from_secs(1200);
const PUBLISH_TIMEOUT_FLOOR: Duration = Duration::from_secs(600);

/// Configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Device group to fetch the fleet from.
    pub group: String,
    pub platform: Platform,
    pub workflow: WorkflowKind,

    /// Admission bound: at most this many jobs active at once.
    pub concurrency: usize,
    /// Maximum budget-consuming retries per stage.
    pub max_retries_per_stage: u32,
    /// Base for exponential stage backoff.
    pub base_backoff: Duration,
    /// Ceiling on exponential backoff before jitter.
    pub backoff_cap: Duration,
    /// Fixed sleep on a rate-limited response (no budget consumed).
    pub rate_limit_backoff: Duration,
    /// Fixed sleep on a too-many-concurrent response (no budget consumed).
    pub concurrency_backoff: Duration,

    /// Fast poll interval for the first 30 s of a task poll.
    pub poll_interval: Duration,
    /// Default per-task poll timeout; stages may override.
    pub poll_timeout: Duration,
    /// Per-stage timeout overrides; floors still apply.
    pub stage_timeouts: HashMap<Stage, Duration>,

    /// App build the bootstrap installs.
    pub app_version_ref: String,
    /// App the bootstrap launches.
    pub app_ref: String,

    /// Remote flow ids bound to known action kinds.
    pub flow_bindings: HashMap<ActionKind, String>,
    /// Optional custom login flow replacing the stock login binding.
    pub custom_login: Option<CustomFlow>,
    /// Stage list for the custom workflow, in user order.
    pub custom_stages: Vec<CustomStageSpec>,

    /// Run-level default warmup intensity; accounts may override.
    pub warmup_intensity: WarmupIntensity,
}

impl RunConfig {
    /// Flow id bound to an action kind, if configured.
    pub fn flow_id(&self, action: ActionKind) -> Option<&str> {
        self.flow_bindings.get(&action).map(String::as_str)
    }

    /// Effective poll timeout for a stage: the override (or default) clamped
    /// up to the stage's floor.
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let configured = self
            .stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.poll_timeout);
        let floor = match stage {
            Stage::Login | Stage::PollLoginTask => LOGIN_TIMEOUT_FLOOR,
            Stage::Warmup => WARMUP_TIMEOUT_FLOOR,
            Stage::PostFirst | Stage::PostSecond => PUBLISH_TIMEOUT_FLOOR,
            _ => Duration::ZERO,
        };
        configured.max(floor)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            group: "default".to_string(),
            platform: Platform::Instagram,
            workflow: WorkflowKind::ProfileSetup,
            concurrency: 5,
            max_retries_per_stage: 3,
            base_backoff: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(120),
            rate_limit_backoff: Duration::from_secs(30),
            concurrency_backoff: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(600),
            stage_timeouts: HashMap::new(),
            app_version_ref: "latest".to_string(),
            app_ref: "com.instagram.android".to_string(),
            flow_bindings: HashMap::new(),
            custom_login: None,
            custom_stages: Vec::new(),
            warmup_intensity: WarmupIntensity::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_timeout_floor_enforced() {
        let mut config = RunConfig::default();
        config
            .stage_timeouts
            .insert(Stage::Login, Duration::from_secs(10));
        assert_eq!(config.stage_timeout(Stage::Login), LOGIN_TIMEOUT_FLOOR);
    }

    #[test]
    fn override_above_floor_wins() {
        let mut config = RunConfig::default();
        config
            .stage_timeouts
            .insert(Stage::Warmup, Duration::from_secs(3600));
        assert_eq!(config.stage_timeout(Stage::Warmup), Duration::from_secs(3600));
    }

    #[test]
    fn unfloored_stage_uses_default() {
        let config = RunConfig::default();
        assert_eq!(config.stage_timeout(Stage::SetBio), config.poll_timeout);
    }

    #[test]
    fn flow_binding_lookup() {
        let mut config = RunConfig::default();
        config
            .flow_bindings
            .insert(ActionKind::SetBio, "flow-77".to_string());
        assert_eq!(config.flow_id(ActionKind::SetBio), Some("flow-77"));
        assert_eq!(config.flow_id(ActionKind::Login), None);
    }
}
