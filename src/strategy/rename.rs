//! Rename ("sister") workflow.
//!
//! Renames the account to its requested username, with a retry sub-protocol
//! for collisions: the original request is tried first, then shuffled
//! compliant candidates derived from the display name, one at a time. A
//! collision advances to the next untried candidate; exhausting them all is
//! a permanent failure rather than a silent fallback to an unrelated name.

use async_trait::async_trait;
use serde_json::json;

use crate::client::ActionKind;
use crate::error::StageError;
use crate::events::LogLevel;
use crate::job::stage::Stage;
use crate::job::{DeviceJob, UsernameRetry};
use crate::strategy::username::generate_candidates;
use crate::strategy::{StageContext, WorkflowKind, WorkflowStrategy};

/// Whether a failure message looks like a username collision.
fn is_taken_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["taken", "already in use", "not available", "unavailable"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Pop the next untried candidate, recording it as attempted.
fn next_candidate(retry: &mut UsernameRetry) -> Option<String> {
    if let Some(current) = retry.current.take() {
        if retry.attempted.insert(current.clone()) {
            return Some(current);
        }
    }
    let next = retry
        .candidates
        .iter()
        .find(|c| !retry.attempted.contains(*c))
        .cloned();
    if let Some(c) = &next {
        retry.attempted.insert(c.clone());
    }
    next
}

pub struct RenameStrategy;

#[async_trait]
impl WorkflowStrategy for RenameStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Rename
    }

    fn first_stage(&self, job: &DeviceJob) -> Stage {
        match job.account.as_ref().and_then(|a| a.rename_to.as_ref()) {
            Some(_) => Stage::Rename,
            None => Stage::Done,
        }
    }

    fn is_retryable(&self, stage: Stage) -> bool {
        stage == Stage::Rename
    }

    fn total_steps(&self) -> u32 {
        1
    }

    fn step_number(&self, stage: Stage) -> Option<u32> {
        (stage == Stage::Rename).then_some(1)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError> {
        if stage != Stage::Rename {
            return Err(StageError::Permanent(format!(
                "rename workflow cannot handle stage {stage}"
            )));
        }

        if ctx.job.username_retry.is_none() {
            let account = ctx.account()?;
            let display = account
                .display_name
                .clone()
                .unwrap_or_else(|| account.username.clone());
            ctx.job.username_retry = Some(UsernameRetry {
                candidates: generate_candidates(&display),
                attempted: Default::default(),
                current: account.rename_to.clone(),
            });
        }

        loop {
            let candidate = ctx
                .job
                .username_retry
                .as_mut()
                .and_then(next_candidate);
            let Some(candidate) = candidate else {
                let tried = ctx
                    .job
                    .username_retry
                    .as_ref()
                    .map_or(0, |r| r.attempted.len());
                return Err(StageError::UsernamesExhausted { tried });
            };

            ctx.log(LogLevel::Info, format!("Trying username '{candidate}'"));
            let result = ctx
                .run_flow(
                    ActionKind::Rename,
                    "rename account",
                    json!({ "new_username": candidate }),
                )
                .await;

            match result {
                Ok(_) => {
                    ctx.log(LogLevel::Info, format!("Renamed account to '{candidate}'"));
                    return Ok(Stage::Done);
                }
                Err(StageError::Transient(msg)) if is_taken_failure(&msg) => {
                    ctx.log(
                        LogLevel::Warn,
                        format!("Username '{candidate}' rejected as taken, trying next"),
                    );
                    // The abandoned rename task must not be mistaken for the
                    // next attempt's task.
                    ctx.job.pending_tasks.remove(&ActionKind::Rename);
                }
                Err(other) => return Err(other),
            }
        }
    }
}
