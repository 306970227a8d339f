//! Engagement warmup workflow.
//!
//! Low-risk automated browsing so a newly authenticated account looks
//! organically active. Intensity controls session count and length; the
//! long-running browse tasks are polled with periodic screenshot evidence.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::client::ActionKind;
use crate::error::StageError;
use crate::events::LogLevel;
use crate::job::stage::Stage;
use crate::job::DeviceJob;
use crate::strategy::{StageContext, WorkflowKind, WorkflowStrategy};

/// Pause between browse sessions.
const SESSION_GAP: Duration = Duration::from_secs(30);

/// Run the account's browse sessions back to back. Shared with the
/// profile-setup workflow, which can front-load a warmup for flagged
/// accounts.
pub(crate) async fn run_browse_sessions(ctx: &mut StageContext<'_>) -> Result<(), StageError> {
    let intensity = ctx
        .account()?
        .intensity_or(ctx.config.warmup_intensity);
    let sessions = intensity.sessions();

    for session in 1..=sessions {
        ctx.log(
            LogLevel::Info,
            format!("Warmup browse session {session}/{sessions} ({intensity:?})"),
        );
        let params = json!({
            "duration_secs": intensity.session_secs(),
            "session": session,
        });
        let task_id = ctx
            .create_flow_task(ActionKind::Browse, "warmup browse", params)
            .await?;
        ctx.poll_with_screenshots(&task_id).await?;

        if session < sessions {
            ctx.sleep(SESSION_GAP).await?;
        }
    }

    Ok(())
}

pub struct WarmupStrategy;

#[async_trait]
impl WorkflowStrategy for WarmupStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Warmup
    }

    fn first_stage(&self, _job: &DeviceJob) -> Stage {
        Stage::Warmup
    }

    fn is_retryable(&self, stage: Stage) -> bool {
        stage == Stage::Warmup
    }

    fn total_steps(&self) -> u32 {
        1
    }

    fn step_number(&self, stage: Stage) -> Option<u32> {
        (stage == Stage::Warmup).then_some(1)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError> {
        if stage != Stage::Warmup {
            return Err(StageError::Permanent(format!(
                "warmup cannot handle stage {stage}"
            )));
        }

        run_browse_sessions(ctx).await?;
        Ok(Stage::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::WarmupIntensity;

    #[test]
    fn intensity_profiles_scale() {
        assert!(WarmupIntensity::Light.sessions() < WarmupIntensity::Heavy.sessions());
        assert!(WarmupIntensity::Light.session_secs() < WarmupIntensity::Heavy.session_secs());
    }

    #[test]
    fn single_step_workflow() {
        let strategy = WarmupStrategy;
        assert_eq!(strategy.total_steps(), 1);
        assert_eq!(strategy.step_number(Stage::Warmup), Some(1));
        assert!(strategy.is_retryable(Stage::Warmup));
        assert!(!strategy.is_retryable(Stage::SetBio));
    }
}
