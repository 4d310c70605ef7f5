use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::GoveeSettings;

use super::client::{on_off, LightClient};

const API_KEY_HEADER: &str = "Govee-API-Key";
const ON_OFF_CAPABILITY: &str = "devices.capabilities.on_off";
const POWER_SWITCH_INSTANCE: &str = "powerSwitch";
const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub request_id: String,
    pub payload: ControlPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlPayload {
    pub sku: String,
    pub device: String,
    pub capability: Capability,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    #[serde(rename = "type")]
    pub kind: String,
    pub instance: String,
    pub value: u8,
}

#[derive(Debug, Deserialize)]
struct ControlResponse {
    code: Option<i64>,
    #[serde(alias = "message")]
    msg: Option<String>,
}

/// Switches a single Govee device through the router control endpoint.
pub struct GoveeClient {
    http: Client,
    endpoint: String,
    api_key: String,
    sku: String,
    device_id: String,
}

impl GoveeClient {
    pub fn new(settings: &GoveeSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout())
            .user_agent("winkcharge")
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            sku: settings.sku.clone(),
            device_id: settings.device_id.clone(),
        })
    }

    pub fn build_request(&self, on: bool) -> ControlRequest {
        ControlRequest {
            request_id: Uuid::new_v4().to_string(),
            payload: ControlPayload {
                sku: self.sku.clone(),
                device: self.device_id.clone(),
                capability: Capability {
                    kind: ON_OFF_CAPABILITY.to_string(),
                    instance: POWER_SWITCH_INSTANCE.to_string(),
                    value: u8::from(on),
                },
            },
        }
    }
}

impl LightClient for GoveeClient {
    async fn set_power(&self, on: bool) -> Result<()> {
        let request = self.build_request(on);
        log::debug!(
            "POST {} request_id={} value={}",
            self.endpoint,
            request.request_id,
            request.payload.capability.value
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("power {} request failed", on_off(on)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read control response body")?;
        check_response(status, &body)
    }

    fn describe(&self) -> String {
        format!("govee {} ({})", self.device_id, self.sku)
    }
}

/// A command succeeded when the status is 2xx and any `code` in the body is 200.
fn check_response(status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        bail!("http status {status}: {}", body.trim());
    }

    match serde_json::from_str::<ControlResponse>(body) {
        Ok(ControlResponse {
            code: Some(code),
            msg,
        }) if code != SUCCESS_CODE => Err(anyhow!(
            "vendor rejected command with code {code}: {}",
            msg.unwrap_or_default()
        )),
        _ => Ok(()),
    }
}
