//! Fleet orchestrator.
//!
//! Owns one run end to end: fetch the fleet, reconcile it against the
//! account list, spin up a bounded set of per-device state machines, and
//! clean up whatever the run leaves behind. Admission is FIFO in device
//! ordinal order; at most `concurrency` machines drive at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::account::AccountRecord;
use crate::client::AutomationClient;
use crate::config::RunConfig;
use crate::error::{ConfigError, Error, JobError, Result};
use crate::events::{EventSender, LogLevel, RunEvent};
use crate::job::stage::BOOTSTRAP_STEPS;
use crate::job::store::{JobStore, RunOutcome, RunSummary};
use crate::job::DeviceJob;
use crate::machine::DeviceMachine;
use crate::matcher;
use crate::poll::spawn_capture;
use crate::strategy::strategy_for;

/// Cadence of `Progress` events while a run is driving.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    client: Arc<dyn AutomationClient>,
    config: Arc<RunConfig>,
    store: Arc<JobStore>,
    events: EventSender,
    /// Token of the current (or next) run. Replaced at the start of every
    /// run so a stop does not poison runs that come after it.
    cancel: Mutex<CancellationToken>,
    /// `true` while no run is active; `stop` waits on this.
    idle: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn AutomationClient>, config: RunConfig) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            client,
            config: Arc::new(config),
            store: Arc::new(JobStore::new()),
            events: EventSender::default(),
            cancel: Mutex::new(CancellationToken::new()),
            idle,
        }
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Execute one full run over the given accounts. Returns the final
    /// summary; per-device failures are reported there, not as an `Err`.
    pub async fn run(&self, accounts: Vec<AccountRecord>) -> Result<RunSummary> {
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts.into());
        }
        if !*self.idle.borrow() {
            return Err(Error::Job(JobError::RunActive));
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();
        let _ = self.idle.send(false);

        let result = self.drive(&cancel, accounts).await;

        let _ = self.idle.send(true);
        result
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
        accounts: Vec<AccountRecord>,
    ) -> Result<RunSummary> {
        let devices = self.client.list_devices(&self.config.group).await?;
        self.events.log(
            LogLevel::Info,
            None,
            None,
            format!(
                "Fetched {} devices from group '{}'",
                devices.len(),
                self.config.group
            ),
        );

        let mut plan = matcher::verify(devices, accounts, self.config.platform);
        matcher::reassign(&mut plan);
        self.quarantine_mismatched(&plan).await;
        let pending_accounts = plan.pending.len();
        for account in &plan.pending {
            self.events.log(
                LogLevel::Warn,
                None,
                None,
                format!("No device available for account '{}', skipping it this run", account.username),
            );
        }

        let strategy = strategy_for(self.config.workflow, &self.config);
        let total_steps = BOOTSTRAP_STEPS + strategy.total_steps();

        self.store.clear().await;
        let mut queue: VecDeque<DeviceJob> = VecDeque::new();
        for assignment in plan.assigned.drain(..) {
            if let Some(from) = &assignment.swapped_from {
                self.events.log(
                    LogLevel::Info,
                    Some(&assignment.device.name),
                    None,
                    format!("Account re-homed from mismatched device '{from}'"),
                );
            }
            let job = DeviceJob::from_assignment(assignment, total_steps);
            self.store.publish(job.clone()).await;
            queue.push_back(job);
        }
        self.events.log(
            LogLevel::Info,
            None,
            None,
            format!(
                "Starting run: {} jobs, concurrency {}, workflow {:?}",
                queue.len(),
                self.config.concurrency,
                self.config.workflow
            ),
        );

        let ticker = self.spawn_progress_ticker(pending_accounts);

        let mut machines: JoinSet<DeviceJob> = JoinSet::new();
        while !queue.is_empty() || !machines.is_empty() {
            while machines.len() < self.config.concurrency && !cancel.is_cancelled() {
                let Some(job) = queue.pop_front() else { break };
                let machine = DeviceMachine::new(
                    job,
                    Arc::clone(&self.config),
                    Arc::clone(&self.client),
                    Arc::clone(&strategy),
                    Arc::clone(&self.store),
                    self.events.clone(),
                    cancel.clone(),
                );
                machines.spawn(machine.run());
            }
            if machines.is_empty() {
                // Cancelled with jobs still queued: they never start.
                break;
            }
            match machines.join_next().await {
                Some(Ok(job)) => {
                    tracing::debug!(device = %job.device_name, stage = %job.stage, "Job finished");
                }
                Some(Err(e)) => {
                    self.events
                        .log(LogLevel::Error, None, None, format!("Job task panicked: {e}"));
                }
                None => {}
            }
        }

        ticker.abort();
        self.cleanup().await;

        let outcome = if cancel.is_cancelled() {
            RunOutcome::Stopped
        } else {
            RunOutcome::Completed
        };
        let summary = self.store.summary(outcome, pending_accounts).await;
        self.events.emit(RunEvent::Summary(summary.clone()));
        Ok(summary)
    }

    /// Cancel the active run and wait for it to unwind. Idempotent; returns
    /// immediately when no run is active.
    pub async fn stop(&self) {
        self.cancel.lock().await.cancel();
        let mut rx = self.idle.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Audit and park every mismatched device: screenshot evidence, then
    /// power off. These devices may hold sessions of accounts outside this
    /// run and are never driven.
    async fn quarantine_mismatched(&self, plan: &matcher::AssignmentPlan) {
        for mismatched in &plan.mismatched {
            self.events.log(
                LogLevel::Warn,
                Some(&mismatched.device.name),
                None,
                format!("Excluding device: {}", mismatched.reason),
            );
            spawn_capture(
                &self.client,
                &self.events,
                &mismatched.device.id,
                &mismatched.device.name,
            );
        }
        let results = join_all(
            plan.mismatched
                .iter()
                .map(|m| self.client.stop_device(&m.device.id)),
        )
        .await;
        for (mismatched, result) in plan.mismatched.iter().zip(results) {
            if let Err(e) = result {
                self.events.log(
                    LogLevel::Warn,
                    Some(&mismatched.device.name),
                    None,
                    format!("Failed to stop mismatched device: {e}"),
                );
            }
        }
    }

    fn spawn_progress_ticker(&self, pending_accounts: usize) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let summary = store.summary(RunOutcome::Running, pending_accounts).await;
                events.emit(RunEvent::Progress(summary));
            }
        })
    }

    /// Release run resources: power off devices a cancelled job left running
    /// and delete media uploaded on the jobs' behalf.
    async fn cleanup(&self) {
        let jobs = self.store.snapshots().await;

        let leftover: Vec<String> = jobs
            .iter()
            .filter(|j| j.started_at.is_some() && !j.is_terminal())
            .map(|j| j.device_id.clone())
            .collect();
        if !leftover.is_empty() {
            self.events.log(
                LogLevel::Info,
                None,
                None,
                format!("Stopping {} devices left running", leftover.len()),
            );
            if let Err(e) = self.client.stop_devices(&leftover).await {
                self.events
                    .log(LogLevel::Warn, None, None, format!("Fleet stop failed: {e}"));
            }
        }

        let media: Vec<String> = jobs
            .iter()
            .flat_map(|j| j.uploaded_media.iter().cloned())
            .collect();
        if !media.is_empty() {
            if let Err(e) = self.client.delete_media(&media).await {
                self.events.log(
                    LogLevel::Warn,
                    None,
                    None,
                    format!("Failed to delete {} uploaded media items: {e}", media.len()),
                );
            }
        }
    }
}
