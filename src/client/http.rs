//! Thin HTTP transport for the remote automation API.
//!
//! Every endpoint returns the uniform `{code, msg, data}` envelope; this
//! module only moves bytes and maps codes, all branching on outcomes lives
//! in the state machine.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::client::{
    ApiCode, AutomationClient, Device, DeviceStatus, Envelope, InstallOutcome, ScreenshotResult,
    TaskInfo,
};
use crate::error::ClientError;

/// reqwest-backed `AutomationClient`.
pub struct HttpClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, ClientError> {
        let resp = self
            .client
            .post(self.url(path))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        envelope.into_data()
    }

    async fn post_unit(&self, path: &str, body: serde_json::Value) -> Result<(), ClientError> {
        self.post::<serde_json::Value>(path, body).await.map(|_| ())
    }
}

#[async_trait]
impl AutomationClient for HttpClient {
    async fn list_devices(&self, group: &str) -> Result<Vec<Device>, ClientError> {
        let devices: Option<Vec<Device>> =
            self.post("device/list", json!({ "group": group })).await?;
        Ok(devices.unwrap_or_default())
    }

    async fn start_device(&self, device_id: &str) -> Result<(), ClientError> {
        self.post_unit("device/start", json!({ "id": device_id })).await
    }

    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, ClientError> {
        let status: Option<DeviceStatus> =
            self.post("device/status", json!({ "id": device_id })).await?;
        Ok(status.unwrap_or(DeviceStatus::Unknown))
    }

    async fn stop_device(&self, device_id: &str) -> Result<(), ClientError> {
        self.post_unit("device/stop", json!({ "id": device_id })).await
    }

    async fn stop_devices(&self, device_ids: &[String]) -> Result<(), ClientError> {
        self.post_unit("device/stop-batch", json!({ "ids": device_ids })).await
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), ClientError> {
        self.post_unit("device/rename", json!({ "id": device_id, "name": name }))
            .await
    }

    async fn install_app(
        &self,
        device_id: &str,
        version_ref: &str,
    ) -> Result<InstallOutcome, ClientError> {
        let result = self
            .post_unit(
                "app/install",
                json!({ "id": device_id, "version": version_ref }),
            )
            .await;

        // Two non-success codes mean the app is effectively present.
        match result {
            Ok(()) => Ok(InstallOutcome::Installed),
            Err(e) => match e.api_code() {
                Some(ApiCode::AppAlreadyInstalling) => Ok(InstallOutcome::AlreadyInstalling),
                Some(ApiCode::AppAlreadyHigherVersion) => {
                    Ok(InstallOutcome::AlreadyHigherVersion)
                }
                _ => Err(e),
            },
        }
    }

    async fn start_app(&self, device_id: &str, app_ref: &str) -> Result<(), ClientError> {
        self.post_unit("app/start", json!({ "id": device_id, "app": app_ref }))
            .await
    }

    async fn create_task(
        &self,
        device_id: &str,
        flow_id: &str,
        name: &str,
        params: serde_json::Value,
    ) -> Result<String, ClientError> {
        #[derive(serde::Deserialize)]
        struct Created {
            task_id: String,
        }

        let created: Option<Created> = self
            .post(
                "task/create",
                json!({
                    "device_id": device_id,
                    "flow_id": flow_id,
                    "name": name,
                    "params": params,
                }),
            )
            .await?;
        created
            .map(|c| c.task_id)
            .ok_or_else(|| ClientError::Decode("task/create returned no task id".into()))
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskInfo, ClientError> {
        let info: Option<TaskInfo> = self.post("task/query", json!({ "id": task_id })).await?;
        info.ok_or_else(|| ClientError::Decode("task/query returned no data".into()))
    }

    async fn request_screenshot(&self, device_id: &str) -> Result<String, ClientError> {
        #[derive(serde::Deserialize)]
        struct Created {
            task_id: String,
        }

        let created: Option<Created> = self
            .post("device/screenshot", json!({ "id": device_id }))
            .await?;
        created
            .map(|c| c.task_id)
            .ok_or_else(|| ClientError::Decode("screenshot returned no task id".into()))
    }

    async fn screenshot_result(&self, task_id: &str) -> Result<ScreenshotResult, ClientError> {
        let result: Option<ScreenshotResult> = self
            .post("device/screenshot-result", json!({ "id": task_id }))
            .await?;
        result.ok_or_else(|| ClientError::Decode("screenshot-result returned no data".into()))
    }

    async fn delete_media(&self, media_ids: &[String]) -> Result<(), ClientError> {
        if media_ids.is_empty() {
            return Ok(());
        }
        self.post_unit("media/delete", json!({ "ids": media_ids })).await
    }
}
