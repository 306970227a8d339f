//! Run events, the core's outbound channel to external consumers.
//!
//! Replaces the process-wide emitter of the source system with an explicit
//! sender constructed once per run and handed to the orchestrator and every
//! state machine. Emission is fire-and-forget and never blocks progression.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::job::stage::Stage;
use crate::job::store::RunSummary;

/// Severity of an emitted log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events produced by a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    StageChanged {
        job_id: Uuid,
        device_id: String,
        device_name: String,
        from: Stage,
        to: Stage,
        step: u32,
        total_steps: u32,
    },
    Log {
        level: LogLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        message: String,
    },
    /// Periodic snapshot while the run is driving.
    Progress(RunSummary),
    /// Final summary; exactly one per run.
    Summary(RunSummary),
}

/// Fire-and-forget broadcast sender for run events.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<RunEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> BroadcastStream<RunEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Emit an event; a lagging or absent subscriber never blocks the run.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(
        &self,
        level: LogLevel,
        device: Option<&str>,
        stage: Option<Stage>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match level {
            LogLevel::Debug => {
                tracing::debug!(device = device.unwrap_or("-"), stage = ?stage, "{message}")
            }
            LogLevel::Info => {
                tracing::info!(device = device.unwrap_or("-"), stage = ?stage, "{message}")
            }
            LogLevel::Warn => {
                tracing::warn!(device = device.unwrap_or("-"), stage = ?stage, "{message}")
            }
            LogLevel::Error => {
                tracing::error!(device = device.unwrap_or("-"), stage = ?stage, "{message}")
            }
        }
        self.emit(RunEvent::Log {
            level,
            device: device.map(str::to_string),
            stage,
            message,
        });
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
