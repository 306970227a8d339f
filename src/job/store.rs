//! Keyed store of job snapshots.
//!
//! Constructed once per run and passed by reference to the orchestrator and
//! every state machine (no process-wide globals). Each job is single-writer:
//! only its own machine publishes updated snapshots; the orchestrator and
//! external readers only ever see clones.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::stage::Stage;
use crate::job::DeviceJob;

/// One failed device in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub device_name: String,
    pub username: Option<String>,
    pub error: String,
}

/// Overall run outcome carried by summary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    Stopped,
}

/// Aggregated run state, recomputed on demand from the live job set so it is
/// always consistent with current state.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub done: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// Jobs admitted to the run but not yet started.
    pub queued: usize,
    /// Accounts that could not be placed on any device this run.
    pub pending_accounts: usize,
    pub failures: Vec<FailureReport>,
}

/// Snapshot store for all jobs in a run.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, DeviceJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fresh snapshot of a job. Called only by the job's machine
    /// (or the orchestrator at creation time).
    pub async fn publish(&self, job: DeviceJob) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn snapshot(&self, id: Uuid) -> Option<DeviceJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn snapshots(&self) -> Vec<DeviceJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Drop every job; called when the run resets.
    pub async fn clear(&self) {
        self.jobs.write().await.clear();
    }

    /// Compute the run summary from the live job set.
    pub async fn summary(&self, outcome: RunOutcome, pending_accounts: usize) -> RunSummary {
        let jobs = self.jobs.read().await;

        let mut summary = RunSummary {
            outcome,
            done: 0,
            failed: 0,
            in_progress: 0,
            queued: 0,
            pending_accounts,
            failures: Vec::new(),
        };

        for job in jobs.values() {
            match job.stage {
                Stage::Done => summary.done += 1,
                Stage::Failed => {
                    summary.failed += 1;
                    summary.failures.push(FailureReport {
                        device_name: job.device_name.clone(),
                        username: job.username().map(str::to_string),
                        error: job
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
                _ if job.started_at.is_some() => summary.in_progress += 1,
                _ => summary.queued += 1,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Device;
    use crate::matcher::{DeviceAssignment, VerificationResult};

    fn job(name: &str) -> DeviceJob {
        DeviceJob::from_assignment(
            DeviceAssignment {
                device: Device {
                    id: name.to_string(),
                    name: name.to_string(),
                    serial: format!("{name}-1"),
                },
                ordinal: 1,
                verification: VerificationResult::Clean,
                account: None,
                swapped_from: None,
            },
            10,
        )
    }

    #[tokio::test]
    async fn publish_and_snapshot() {
        let store = JobStore::new();
        let job = job("d1");
        let id = job.id;
        store.publish(job).await;

        let snap = store.snapshot(id).await.unwrap();
        assert_eq!(snap.device_name, "d1");
        assert!(store.snapshot(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn summary_reflects_current_state() {
        let store = JobStore::new();

        let done = {
            let mut j = job("done-dev");
            j.enter_stage(Stage::Done, None);
            j
        };
        let failed = {
            let mut j = job("failed-dev");
            j.set_error("SET_BIO retries exhausted");
            j.enter_stage(Stage::Failed, None);
            j
        };
        let active = {
            let mut j = job("active-dev");
            j.enter_stage(Stage::Login, Some(6));
            j
        };
        let queued = job("queued-dev");

        for j in [done, failed, active, queued] {
            store.publish(j).await;
        }

        let summary = store.summary(RunOutcome::Running, 2).await;
        assert_eq!(summary.done, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.pending_accounts, 2);

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].device_name, "failed-dev");
        assert!(summary.failures[0].error.contains("SET_BIO"));
    }

    #[tokio::test]
    async fn clear_resets_the_run() {
        let store = JobStore::new();
        store.publish(job("d1")).await;
        assert!(!store.is_empty().await);
        store.clear().await;
        assert!(store.is_empty().await);
    }
}
