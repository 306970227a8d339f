//! Shared test doubles for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use fleet_pilot::account::AccountRecord;
use fleet_pilot::client::{
    AutomationClient, Device, DeviceStatus, InstallOutcome, ScreenshotResult, TaskInfo, TaskStatus,
};
use fleet_pilot::error::ClientError;

pub fn device(id: &str, name: &str, serial: &str) -> Device {
    Device {
        id: id.to_string(),
        name: name.to_string(),
        serial: serial.to_string(),
    }
}

pub fn account(username: &str) -> AccountRecord {
    account_from(serde_json::json!({ "username": username, "password": "pw" }))
}

pub fn account_from(value: serde_json::Value) -> AccountRecord {
    serde_json::from_value(value).unwrap()
}

pub fn completed() -> TaskInfo {
    TaskInfo {
        status: TaskStatus::Completed,
        fail_desc: None,
        cost: None,
    }
}

pub fn completed_with(desc: &str) -> TaskInfo {
    TaskInfo {
        status: TaskStatus::Completed,
        fail_desc: Some(desc.to_string()),
        cost: None,
    }
}

pub fn failed(desc: &str) -> TaskInfo {
    TaskInfo {
        status: TaskStatus::Failed,
        fail_desc: Some(desc.to_string()),
        cost: None,
    }
}

#[derive(Default)]
struct State {
    task_seq: u32,
    /// task id -> flow id the task was created for.
    task_flows: HashMap<String, String>,
    /// Scripted `query_task` responses per flow, consumed in order.
    scripts: HashMap<String, VecDeque<TaskInfo>>,
    /// Flows whose tasks never terminate.
    looping: HashSet<String>,
    /// Flows whose tasks always fail, with the failure description.
    failing: HashMap<String, String>,

    created: Vec<String>,
    stopped: Vec<String>,
    batch_stopped: Vec<String>,
    renamed: Vec<(String, String)>,
    deleted_media: Vec<String>,
}

/// Scriptable in-memory fleet. Devices are always running; task behavior is
/// configured per flow id, defaulting to immediate clean completion.
pub struct MockClient {
    devices: Vec<Device>,
    state: Mutex<State>,
}

impl MockClient {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            state: Mutex::new(State::default()),
        }
    }

    /// Queue `query_task` responses for tasks of a flow; once drained, tasks
    /// of that flow complete cleanly.
    pub fn script_flow(&self, flow_id: &str, responses: Vec<TaskInfo>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(flow_id.to_string(), responses.into());
    }

    /// Tasks of this flow stay in progress forever.
    pub fn loop_flow(&self, flow_id: &str) {
        self.state.lock().unwrap().looping.insert(flow_id.to_string());
    }

    /// Tasks of this flow always fail with the given description.
    pub fn fail_flow(&self, flow_id: &str, desc: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(flow_id.to_string(), desc.to_string());
    }

    /// Flow ids of every created task, in creation order.
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn batch_stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().batch_stopped.clone()
    }

    pub fn renamed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().renamed.clone()
    }

    pub fn deleted_media(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_media.clone()
    }
}

#[async_trait]
impl AutomationClient for MockClient {
    async fn list_devices(&self, _group: &str) -> Result<Vec<Device>, ClientError> {
        Ok(self.devices.clone())
    }

    async fn start_device(&self, _device_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn device_status(&self, _device_id: &str) -> Result<DeviceStatus, ClientError> {
        Ok(DeviceStatus::Running)
    }

    async fn stop_device(&self, device_id: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .stopped
            .push(device_id.to_string());
        Ok(())
    }

    async fn stop_devices(&self, device_ids: &[String]) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .batch_stopped
            .extend(device_ids.iter().cloned());
        Ok(())
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .renamed
            .push((device_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn install_app(
        &self,
        _device_id: &str,
        _version_ref: &str,
    ) -> Result<InstallOutcome, ClientError> {
        Ok(InstallOutcome::Installed)
    }

    async fn start_app(&self, _device_id: &str, _app_ref: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn create_task(
        &self,
        _device_id: &str,
        flow_id: &str,
        _name: &str,
        _params: serde_json::Value,
    ) -> Result<String, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.task_seq += 1;
        let task_id = format!("task-{}", state.task_seq);
        state.task_flows.insert(task_id.clone(), flow_id.to_string());
        state.created.push(flow_id.to_string());
        Ok(task_id)
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskInfo, ClientError> {
        let mut state = self.state.lock().unwrap();
        let flow = state.task_flows.get(task_id).cloned().unwrap_or_default();
        if state.looping.contains(&flow) {
            return Ok(TaskInfo {
                status: TaskStatus::InProgress,
                fail_desc: None,
                cost: None,
            });
        }
        if let Some(desc) = state.failing.get(&flow).cloned() {
            return Ok(failed(&desc));
        }
        if let Some(queued) = state.scripts.get_mut(&flow).and_then(|q| q.pop_front()) {
            return Ok(queued);
        }
        Ok(completed())
    }

    async fn request_screenshot(&self, _device_id: &str) -> Result<String, ClientError> {
        Ok("shot-1".to_string())
    }

    async fn screenshot_result(&self, _task_id: &str) -> Result<ScreenshotResult, ClientError> {
        Ok(ScreenshotResult {
            status: TaskStatus::Completed,
            download_link: Some("http://shots.test/1.png".to_string()),
        })
    }

    async fn delete_media(&self, media_ids: &[String]) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .deleted_media
            .extend(media_ids.iter().cloned());
        Ok(())
    }
}
