//! User-defined workflow: an ordered list of configured flow stages run
//! exactly as given.
//!
//! Parameters are filled by name from the account record. The mapping is
//! semantic, not positional: a parameter whose name mentions "user" gets the
//! username, "pass" the password, and so on. Unrecognized parameter names
//! are dropped with a warning rather than failing the stage.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};

use crate::account::AccountRecord;
use crate::client::ActionKind;
use crate::config::{CustomStageSpec, RunConfig};
use crate::error::StageError;
use crate::events::LogLevel;
use crate::job::stage::Stage;
use crate::job::DeviceJob;
use crate::strategy::{StageContext, WorkflowKind, WorkflowStrategy};

/// Map one configured parameter name onto an account value. `None` means
/// the name is not recognized.
pub(crate) fn resolve_param(name: &str, account: &AccountRecord) -> Option<Value> {
    let lower = name.to_ascii_lowercase();
    if lower.contains("user") {
        Some(json!(account.username))
    } else if lower.contains("pass") {
        Some(json!(account.password.expose_secret()))
    } else if lower.contains("2fa") || lower.contains("totp") || lower.contains("secret") {
        account
            .totp_secret
            .as_ref()
            .map(|s| json!(s.expose_secret()))
    } else if lower.contains("date") {
        Some(json!(Utc::now().format("%Y-%m-%d").to_string()))
    } else {
        None
    }
}

pub struct CustomStrategy {
    stages: Vec<CustomStageSpec>,
}

impl CustomStrategy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            stages: config.custom_stages.clone(),
        }
    }

    fn spec(&self, index: u8) -> Option<&CustomStageSpec> {
        self.stages.get(usize::from(index))
    }
}

#[async_trait]
impl WorkflowStrategy for CustomStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Custom
    }

    fn first_stage(&self, _job: &DeviceJob) -> Stage {
        if self.stages.is_empty() {
            Stage::Done
        } else {
            Stage::Custom(0)
        }
    }

    fn is_retryable(&self, stage: Stage) -> bool {
        matches!(stage, Stage::Custom(_))
    }

    fn total_steps(&self) -> u32 {
        self.stages.len() as u32
    }

    fn step_number(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Custom(i) if usize::from(i) < self.stages.len() => Some(u32::from(i) + 1),
            _ => None,
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError> {
        let Stage::Custom(index) = stage else {
            return Err(StageError::Permanent(format!(
                "custom workflow cannot handle stage {stage}"
            )));
        };
        let spec = self.spec(index).ok_or_else(|| {
            StageError::Permanent(format!("no custom stage configured at position {index}"))
        })?;

        let account = ctx.account()?;
        let mut params = Map::new();
        for name in &spec.param_names {
            match resolve_param(name, account) {
                Some(value) => {
                    params.insert(name.clone(), value);
                }
                None => {
                    ctx.log(
                        LogLevel::Warn,
                        format!("Dropping unrecognized parameter '{name}' for stage '{}'", spec.name),
                    );
                }
            }
        }

        ctx.log(
            LogLevel::Info,
            format!("Running custom stage '{}' ({})", spec.name, spec.flow_id),
        );
        let flow_id = spec.flow_id.clone();
        let name = spec.name.clone();
        let task_id = ctx
            .create_task_with_flow(ActionKind::CustomFlow, &flow_id, &name, Value::Object(params))
            .await?;
        ctx.poll_with_screenshots(&task_id).await?;

        let next = index + 1;
        if self.spec(next).is_some() {
            Ok(Stage::Custom(next))
        } else {
            Ok(Stage::Done)
        }
    }
}
