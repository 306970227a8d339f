//! Generic remote-task polling.
//!
//! Long-running RPA tasks are polled with a progressive interval so a
//! multi-minute task does not generate hundreds of status queries: fast for
//! the first 30 s, medium to 2 min, slow thereafter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{AutomationClient, TaskInfo, TaskStatus};
use crate::error::StageError;
use crate::events::{EventSender, LogLevel};
use crate::retry::sleep_cancellable;

/// Consecutive transient query failures tolerated before escalating.
const MAX_CONSECUTIVE_QUERY_ERRORS: u32 = 3;

/// How often the screenshot-taking poll variant captures evidence.
const SCREENSHOT_CADENCE: Duration = Duration::from_secs(60);

/// Terminal outcome of a poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Completed(TaskInfo),
    Failed(TaskInfo),
    /// The remote task was cancelled on the far side.
    CancelledRemote(TaskInfo),
    /// The run was cancelled locally; handlers unwind without failing the job.
    CancelledLocal,
    TimedOut,
}

fn interval_for(elapsed: Duration, base: Duration) -> Duration {
    if elapsed < Duration::from_secs(30) {
        base
    } else if elapsed < Duration::from_secs(120) {
        base * 3
    } else {
        base * 8
    }
}

/// Poll a task until it reaches a terminal status, the timeout elapses, or
/// the run is cancelled.
pub async fn poll_task(
    client: &Arc<dyn AutomationClient>,
    task_id: &str,
    base_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PollOutcome, StageError> {
    let started = Instant::now();
    let mut consecutive_errors = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::CancelledLocal);
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Ok(PollOutcome::TimedOut);
        }

        match client.query_task(task_id).await {
            Ok(info) => {
                consecutive_errors = 0;
                match info.status {
                    TaskStatus::Completed => return Ok(PollOutcome::Completed(info)),
                    TaskStatus::Failed => return Ok(PollOutcome::Failed(info)),
                    TaskStatus::Cancelled => return Ok(PollOutcome::CancelledRemote(info)),
                    TaskStatus::Waiting | TaskStatus::InProgress => {}
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::debug!(
                    task = task_id,
                    consecutive = consecutive_errors,
                    error = %e,
                    "Task status query failed"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_QUERY_ERRORS {
                    return Err(StageError::Transient(format!(
                        "task {task_id} status query failed {consecutive_errors} times: {e}"
                    )));
                }
            }
        }

        if !sleep_cancellable(interval_for(started.elapsed(), base_interval), cancel).await {
            return Ok(PollOutcome::CancelledLocal);
        }
    }
}

/// Poll variant that additionally captures a device screenshot at a fixed
/// cadence. Capture is dispatched fire-and-forget so a slow screenshot
/// pipeline never stalls the poll itself.
pub async fn poll_task_with_screenshots(
    client: &Arc<dyn AutomationClient>,
    task_id: &str,
    device_id: &str,
    device_name: &str,
    base_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<PollOutcome, StageError> {
    let started = Instant::now();
    let mut consecutive_errors = 0u32;
    let mut last_shot = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::CancelledLocal);
        }
        if started.elapsed() >= timeout {
            return Ok(PollOutcome::TimedOut);
        }

        if last_shot.elapsed() >= SCREENSHOT_CADENCE {
            last_shot = Instant::now();
            spawn_capture(client, events, device_id, device_name);
        }

        match client.query_task(task_id).await {
            Ok(info) => {
                consecutive_errors = 0;
                match info.status {
                    TaskStatus::Completed => return Ok(PollOutcome::Completed(info)),
                    TaskStatus::Failed => return Ok(PollOutcome::Failed(info)),
                    TaskStatus::Cancelled => return Ok(PollOutcome::CancelledRemote(info)),
                    TaskStatus::Waiting | TaskStatus::InProgress => {}
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_QUERY_ERRORS {
                    return Err(StageError::Transient(format!(
                        "task {task_id} status query failed {consecutive_errors} times: {e}"
                    )));
                }
            }
        }

        if !sleep_cancellable(interval_for(started.elapsed(), base_interval), cancel).await {
            return Ok(PollOutcome::CancelledLocal);
        }
    }
}

/// Request a screenshot and resolve its download link in the background.
/// Never blocks the caller; the link (or failure) is surfaced as a log event.
pub fn spawn_capture(
    client: &Arc<dyn AutomationClient>,
    events: &EventSender,
    device_id: &str,
    device_name: &str,
) {
    let client = Arc::clone(client);
    let events = events.clone();
    let device_id = device_id.to_string();
    let device_name = device_name.to_string();

    tokio::spawn(async move {
        match client.request_screenshot(&device_id).await {
            Ok(task_id) => spawn_resolve(&client, &events, &device_name, &task_id),
            Err(e) => {
                events.log(
                    LogLevel::Warn,
                    Some(&device_name),
                    None,
                    format!("Screenshot request failed: {e}"),
                );
            }
        }
    });
}

/// Resolve an already-requested screenshot's download link in the background.
pub fn spawn_resolve(
    client: &Arc<dyn AutomationClient>,
    events: &EventSender,
    device_name: &str,
    task_id: &str,
) {
    let client = Arc::clone(client);
    let events = events.clone();
    let device_name = device_name.to_string();
    let task_id = task_id.to_string();

    tokio::spawn(async move {
        // Brief resolution loop; screenshots that take longer than this are
        // abandoned rather than tracked forever.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            match client.screenshot_result(&task_id).await {
                Ok(result) if result.status == TaskStatus::Completed => {
                    if let Some(link) = result.download_link {
                        events.log(
                            LogLevel::Info,
                            Some(&device_name),
                            None,
                            format!("Screenshot captured: {link}"),
                        );
                    }
                    return;
                }
                Ok(result) if result.status.is_terminal() => {
                    events.log(
                        LogLevel::Warn,
                        Some(&device_name),
                        None,
                        format!("Screenshot task ended {:?}", result.status),
                    );
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(device = %device_name, error = %e, "Screenshot result query failed");
                }
            }
        }
    });
}
