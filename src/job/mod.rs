//! Per-device job state.

pub mod stage;
pub mod store;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::AccountRecord;
use crate::client::ActionKind;
use crate::job::stage::Stage;
use crate::matcher::{DeviceAssignment, VerificationResult};

/// A screenshot requested for this job; the download link resolves in the
/// background and is surfaced via events.
#[derive(Debug, Clone)]
pub struct ScreenshotRecord {
    pub task_id: String,
    pub requested_at: DateTime<Utc>,
}

/// Scratch state for the rename workflow's username-retry sub-protocol.
#[derive(Debug, Clone, Default)]
pub struct UsernameRetry {
    pub candidates: Vec<String>,
    pub attempted: HashSet<String>,
    pub current: Option<String>,
}

/// One device's job for the duration of a run.
///
/// Single-writer: only the job's own state machine mutates it; everyone else
/// reads snapshots published to the `JobStore`.
#[derive(Debug, Clone)]
pub struct DeviceJob {
    pub id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub serial: String,
    pub ordinal: u64,

    pub account: Option<AccountRecord>,
    pub verification: VerificationResult,
    /// Mismatched device this job's account was originally expected on.
    pub swapped_from: Option<String>,

    pub stage: Stage,
    /// Budget-consuming attempts per stage; never decreases within a run.
    pub attempts: HashMap<Stage, u32>,
    /// In-flight remote task ids by action kind. Cleared whenever an attempt
    /// is abandoned so the next attempt starts a fresh remote task.
    pub pending_tasks: HashMap<ActionKind, String>,
    /// Ordered, append-only screenshot evidence.
    pub screenshots: Vec<ScreenshotRecord>,
    /// Media uploaded on behalf of this job, deleted at run cleanup.
    pub uploaded_media: Vec<String>,

    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,

    pub current_step: u32,
    pub total_steps: u32,

    /// Content-publishing scratch: index of the next post to publish.
    pub post_index: u8,
    pub username_retry: Option<UsernameRetry>,
}

impl DeviceJob {
    /// Build a job from a matcher assignment.
    pub fn from_assignment(assignment: DeviceAssignment, total_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device_id: assignment.device.id,
            device_name: assignment.device.name,
            serial: assignment.device.serial,
            ordinal: assignment.ordinal,
            account: assignment.account,
            verification: assignment.verification,
            swapped_from: assignment.swapped_from,
            stage: Stage::Init,
            attempts: HashMap::new(),
            pending_tasks: HashMap::new(),
            screenshots: Vec::new(),
            uploaded_media: Vec::new(),
            last_error: None,
            started_at: None,
            updated_at: now,
            stage_entered_at: now,
            current_step: 0,
            total_steps,
            post_index: 0,
            username_retry: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn username(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.username.as_str())
    }

    /// Record a budget-consuming attempt of a stage; returns the new count.
    pub fn record_attempt(&mut self, stage: Stage) -> u32 {
        let count = self.attempts.entry(stage).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Abandon the current attempt's remote tasks so the next attempt starts
    /// fresh ones.
    pub fn clear_pending_tasks(&mut self) {
        self.pending_tasks.clear();
    }

    pub fn track_task(&mut self, kind: ActionKind, task_id: String) {
        self.pending_tasks.insert(kind, task_id);
    }

    pub fn track_screenshot(&mut self, task_id: String) {
        self.screenshots.push(ScreenshotRecord {
            task_id,
            requested_at: Utc::now(),
        });
    }

    /// Enter a new stage, updating timestamps and the progress counter.
    ///
    /// `step` is the stage's step number within the active workflow; progress
    /// is monotonic and capped at the workflow's declared total.
    pub fn enter_stage(&mut self, stage: Stage, step: Option<u32>) {
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.stage = stage;
        self.stage_entered_at = now;
        self.updated_at = now;
        if let Some(step) = step {
            self.current_step = self.current_step.max(step.min(self.total_steps));
        }
        if stage == Stage::Done {
            self.current_step = self.total_steps;
        }
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Device;

    fn job() -> DeviceJob {
        let assignment = DeviceAssignment {
            device: Device {
                id: "d1".into(),
                name: "Device1".into(),
                serial: "emu-1".into(),
            },
            ordinal: 1,
            verification: VerificationResult::Clean,
            account: None,
            swapped_from: None,
        };
        DeviceJob::from_assignment(assignment, 12)
    }

    #[test]
    fn attempts_are_monotonic() {
        let mut job = job();
        assert_eq!(job.attempts_for(Stage::SetBio), 0);
        assert_eq!(job.record_attempt(Stage::SetBio), 1);
        assert_eq!(job.record_attempt(Stage::SetBio), 2);
        assert_eq!(job.attempts_for(Stage::SetBio), 2);
        // Other stages unaffected.
        assert_eq!(job.attempts_for(Stage::Login), 0);
    }

    #[test]
    fn pending_tasks_cleared_between_attempts() {
        let mut job = job();
        job.track_task(ActionKind::Login, "t-1".into());
        job.track_task(ActionKind::SetBio, "t-2".into());
        job.clear_pending_tasks();
        assert!(job.pending_tasks.is_empty());
    }

    #[test]
    fn progress_capped_and_monotonic() {
        let mut job = job();
        job.enter_stage(Stage::Login, Some(6));
        assert_eq!(job.current_step, 6);
        // Restart from an earlier stage never regresses progress.
        job.enter_stage(Stage::StartDevice, Some(2));
        assert_eq!(job.current_step, 6);
        // Steps beyond the declared total are capped.
        job.enter_stage(Stage::SetBio, Some(99));
        assert_eq!(job.current_step, 12);
    }

    #[test]
    fn done_pins_progress_to_total() {
        let mut job = job();
        job.enter_stage(Stage::Done, None);
        assert_eq!(job.current_step, 12);
    }

    #[test]
    fn started_at_set_on_first_stage_entry() {
        let mut job = job();
        assert!(job.started_at.is_none());
        job.enter_stage(Stage::Init, Some(1));
        assert!(job.started_at.is_some());
    }
}
