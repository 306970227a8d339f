//! Per-device state machine.
//!
//! Owns one `DeviceJob` for the duration of a run and drives it from `Init`
//! to one of the two terminals. The shared bootstrap (power on, install,
//! login, identity stamp) is handled here; everything after it is delegated
//! to the active `WorkflowStrategy`.
//!
//! Error classification and the retry budget live in the run loop, not in
//! stage handlers: handlers raise a `StageError` and the machine decides
//! whether that means a restart, a fixed sleep, a budgeted retry, or a
//! permanent failure.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{ActionKind, AutomationClient, DeviceStatus, InstallOutcome, TaskStatus};
use crate::config::RunConfig;
use crate::error::StageError;
use crate::events::{EventSender, LogLevel, RunEvent};
use crate::job::stage::{Stage, BOOTSTRAP_STEPS};
use crate::job::store::JobStore;
use crate::job::DeviceJob;
use crate::matcher::VerificationResult;
use crate::poll::spawn_capture;
use crate::retry::{backoff_delay, sleep_cancellable};
use crate::strategy::{resolve_param, StageContext, WorkflowStrategy};

/// How long the post-login verification probe may sit in `Waiting` before
/// the login is treated as unverified.
const VERIFY_WINDOW: Duration = Duration::from_secs(60);

pub struct DeviceMachine {
    job: DeviceJob,
    config: Arc<RunConfig>,
    client: Arc<dyn AutomationClient>,
    strategy: Arc<dyn WorkflowStrategy>,
    store: Arc<JobStore>,
    events: EventSender,
    cancel: CancellationToken,
}

impl DeviceMachine {
    pub fn new(
        job: DeviceJob,
        config: Arc<RunConfig>,
        client: Arc<dyn AutomationClient>,
        strategy: Arc<dyn WorkflowStrategy>,
        store: Arc<JobStore>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            config,
            client,
            strategy,
            store,
            events,
            cancel,
        }
    }

    /// Drive the job to a terminal stage (or until the run is cancelled) and
    /// return its final state.
    pub async fn run(mut self) -> DeviceJob {
        self.transition(Stage::Init).await;
        self.publish().await;

        while !self.job.is_terminal() {
            if self.cancel.is_cancelled() {
                self.log(LogLevel::Info, "Run cancelled, unwinding");
                break;
            }

            let stage = self.job.stage;
            match self.execute(stage).await {
                Ok(next) => self.transition(next).await,
                Err(err) => self.handle_error(stage, err).await,
            }
            self.publish().await;
        }

        self.finish().await;
        self.job
    }

    async fn execute(&mut self, stage: Stage) -> Result<Stage, StageError> {
        let Self {
            job,
            config,
            client,
            strategy,
            events,
            cancel,
            ..
        } = self;
        let mut ctx = StageContext {
            job,
            config: &**config,
            client: &*client,
            events: &*events,
            cancel: &*cancel,
        };
        if stage.is_bootstrap() {
            bootstrap_stage(stage, &mut ctx, strategy).await
        } else {
            strategy.run_stage(stage, &mut ctx).await
        }
    }

    /// Classify a stage error into restart / fixed sleep / budgeted retry /
    /// permanent failure.
    async fn handle_error(&mut self, stage: Stage, err: StageError) {
        match err {
            StageError::DeviceNotRunning => {
                self.log(
                    LogLevel::Warn,
                    "Device stopped underneath the job, restarting it",
                );
                self.job.clear_pending_tasks();
                self.transition(Stage::StartDevice).await;
            }
            StageError::AppNotInstalled => {
                self.log(LogLevel::Warn, "App missing, reinstalling");
                self.job.clear_pending_tasks();
                self.transition(Stage::InstallApp).await;
            }
            StageError::RateLimited => {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Rate limited, sleeping {:?} before re-entering {stage}",
                        self.config.rate_limit_backoff
                    ),
                );
                sleep_cancellable(self.config.rate_limit_backoff, &self.cancel).await;
            }
            StageError::TooManyConcurrent => {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Remote task slots exhausted, sleeping {:?} before re-entering {stage}",
                        self.config.concurrency_backoff
                    ),
                );
                sleep_cancellable(self.config.concurrency_backoff, &self.cancel).await;
            }
            err if err.is_permanent() => self.fail(err).await,
            // The run loop checks the token at the top of the next iteration
            // and unwinds; nothing to classify here.
            StageError::Cancelled => {}
            err => {
                // Transient (including an unverified login). Budget is
                // charged against the retry target, not the stage that
                // observed the failure.
                let retryable = stage.is_bootstrap() || self.strategy.is_retryable(stage);
                if !retryable {
                    self.fail(err).await;
                    return;
                }
                let target = stage.retry_target();
                let attempts = self.job.record_attempt(target);
                if attempts > self.config.max_retries_per_stage {
                    self.fail(StageError::RetriesExhausted {
                        stage: target,
                        attempts,
                    })
                    .await;
                    return;
                }
                let delay = backoff_delay(self.config.base_backoff, attempts, self.config.backoff_cap);
                self.log(
                    LogLevel::Warn,
                    format!("{err}; retry {attempts}/{} of {target} in {delay:?}", self.config.max_retries_per_stage),
                );
                self.job.clear_pending_tasks();
                if sleep_cancellable(delay, &self.cancel).await {
                    self.transition(target).await;
                }
            }
        }
    }

    async fn fail(&mut self, err: StageError) {
        self.log(LogLevel::Error, format!("Job failed: {err}"));
        self.job.set_error(err.to_string());
        self.transition(Stage::Failed).await;
    }

    /// Progress step for a stage: bootstrap steps come first, workflow steps
    /// are offset past them.
    fn step_for(&self, stage: Stage) -> Option<u32> {
        stage
            .bootstrap_step()
            .or_else(|| self.strategy.step_number(stage).map(|s| BOOTSTRAP_STEPS + s))
    }

    async fn transition(&mut self, next: Stage) {
        let from = self.job.stage;
        let step = self.step_for(next);
        self.job.enter_stage(next, step);
        self.events.emit(RunEvent::StageChanged {
            job_id: self.job.id,
            device_id: self.job.device_id.clone(),
            device_name: self.job.device_name.clone(),
            from,
            to: next,
            step: self.job.current_step,
            total_steps: self.job.total_steps,
        });
    }

    /// Terminal housekeeping: evidence on failure, then release the device.
    /// A job interrupted by cancellation stays non-terminal here; the
    /// orchestrator's cleanup stops its device.
    async fn finish(&mut self) {
        match self.job.stage {
            Stage::Done => {
                self.log(LogLevel::Info, "Workflow complete");
                self.stop_device().await;
            }
            Stage::Failed => {
                // Best effort: the capture races the device stop below.
                spawn_capture(
                    &self.client,
                    &self.events,
                    &self.job.device_id,
                    &self.job.device_name,
                );
                self.stop_device().await;
            }
            _ => {}
        }
        self.publish().await;
    }

    async fn stop_device(&self) {
        if let Err(e) = self.client.stop_device(&self.job.device_id).await {
            self.log(LogLevel::Warn, format!("Failed to stop device: {e}"));
        }
    }

    async fn publish(&self) {
        self.store.publish(self.job.clone()).await;
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.events
            .log(level, Some(&self.job.device_name), Some(self.job.stage), message);
    }
}

/// Shared bootstrap handlers, one arm per bootstrap stage.
async fn bootstrap_stage(
    stage: Stage,
    ctx: &mut StageContext<'_>,
    strategy: &Arc<dyn WorkflowStrategy>,
) -> Result<Stage, StageError> {
    match stage {
        Stage::Init => {
            let status = ctx.client.device_status(&ctx.job.device_id).await?;
            if status == DeviceStatus::Running {
                Ok(Stage::InstallApp)
            } else {
                Ok(Stage::StartDevice)
            }
        }

        Stage::StartDevice => {
            ctx.client.start_device(&ctx.job.device_id).await?;
            ctx.log(LogLevel::Info, "Device start requested");
            Ok(Stage::ConfirmRunning)
        }

        Stage::ConfirmRunning => {
            let timeout = ctx.config.stage_timeout(Stage::ConfirmRunning);
            let started = Instant::now();
            loop {
                if ctx.is_cancelled() {
                    return Err(StageError::Cancelled);
                }
                let status = ctx.client.device_status(&ctx.job.device_id).await?;
                if status == DeviceStatus::Running {
                    return Ok(Stage::InstallApp);
                }
                if started.elapsed() >= timeout {
                    return Err(StageError::Transient(format!(
                        "device did not reach running state (last {status:?})"
                    )));
                }
                ctx.sleep(ctx.config.poll_interval).await?;
            }
        }

        Stage::InstallApp => {
            let outcome = ctx
                .client
                .install_app(&ctx.job.device_id, &ctx.config.app_version_ref)
                .await?;
            match outcome {
                InstallOutcome::Installed => ctx.log(LogLevel::Info, "App install requested"),
                InstallOutcome::AlreadyInstalling => {
                    ctx.log(LogLevel::Debug, "App install already in progress")
                }
                InstallOutcome::AlreadyHigherVersion => {
                    ctx.log(LogLevel::Debug, "Newer app build already present")
                }
            }
            Ok(Stage::ConfirmInstalled)
        }

        Stage::ConfirmInstalled => {
            // Launching doubles as the install check: a missing app surfaces
            // as AppNotInstalled and routes back to InstallApp.
            ctx.client
                .start_app(&ctx.job.device_id, &ctx.config.app_ref)
                .await?;
            let authenticated = matches!(ctx.job.verification, VerificationResult::Matched);
            if authenticated || !strategy.requires_login() {
                if authenticated {
                    ctx.log(
                        LogLevel::Info,
                        "Device already authenticated as its account, skipping login",
                    );
                }
                Ok(strategy.first_stage(ctx.job))
            } else {
                Ok(Stage::Login)
            }
        }

        Stage::Login => {
            let account = ctx.account()?.clone();
            let custom_login = ctx.config.custom_login.clone();
            match custom_login {
                Some(flow) => {
                    let mut params = Map::new();
                    for name in &flow.param_names {
                        if let Some(value) = resolve_param(name, &account) {
                            params.insert(name.clone(), value);
                        }
                    }
                    ctx.create_task_with_flow(
                        ActionKind::Login,
                        &flow.flow_id,
                        "login",
                        Value::Object(params),
                    )
                    .await?;
                }
                None => {
                    let mut params = json!({
                        "username": account.username,
                        "password": account.password.expose_secret(),
                    });
                    if let Some(totp) = &account.totp_secret {
                        params["totp_secret"] = json!(totp.expose_secret());
                    }
                    ctx.create_flow_task(ActionKind::Login, "login", params).await?;
                }
            }
            Ok(Stage::PollLoginTask)
        }

        Stage::PollLoginTask => {
            let task_id = ctx
                .job
                .pending_tasks
                .get(&ActionKind::Login)
                .cloned()
                .ok_or_else(|| StageError::Transient("login task id missing".into()))?;
            ctx.poll(&task_id).await?;
            Ok(Stage::VerifyLogin)
        }

        Stage::VerifyLogin => {
            // Logins can report success while the session underneath is dead.
            // Re-verify with a follow-on task when a verification flow is
            // bound; without one the login result is trusted as-is.
            if ctx.config.flow_id(ActionKind::VerifySession).is_none() {
                ctx.log(
                    LogLevel::Debug,
                    "No session-verification flow bound, trusting login result",
                );
                return Ok(Stage::StampIdentity);
            }
            let username = ctx.account()?.username.clone();
            let task_id = ctx
                .create_flow_task(
                    ActionKind::VerifySession,
                    "verify session",
                    json!({ "username": username }),
                )
                .await?;
            // The probe only has to start executing: a dead session makes
            // the remote flow fail immediately instead.
            let window = Instant::now();
            loop {
                let info = ctx.client.query_task(&task_id).await?;
                match info.status {
                    TaskStatus::InProgress | TaskStatus::Completed => {
                        return Ok(Stage::StampIdentity);
                    }
                    TaskStatus::Failed | TaskStatus::Cancelled => {
                        return Err(StageError::LoginNotVerified(
                            info.fail_desc
                                .unwrap_or_else(|| "verification task failed".into()),
                        ));
                    }
                    TaskStatus::Waiting => {}
                }
                if window.elapsed() >= VERIFY_WINDOW {
                    return Err(StageError::LoginNotVerified(
                        "verification task never started".into(),
                    ));
                }
                ctx.sleep(ctx.config.poll_interval).await?;
            }
        }

        Stage::StampIdentity => {
            let username = ctx.account()?.username.clone();
            let name = format!("{username} {}", ctx.config.platform);
            ctx.client.rename_device(&ctx.job.device_id, &name).await?;
            ctx.job.device_name = name;
            ctx.log(LogLevel::Info, "Device stamped with account identity");
            Ok(strategy.first_stage(ctx.job))
        }

        other => Err(StageError::Permanent(format!(
            "{other} is not a bootstrap stage"
        ))),
    }
}
