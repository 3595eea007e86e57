use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use super::{ConnectionParams, DeviceReader, Reading};
use crate::error::{LoggerError, Result};

pub const DEVICE_TYPE: &str = "shelly";

const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

#[derive(Error, Debug)]
pub enum ShellyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API call failed with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing connection parameter: {0}")]
    MissingParam(&'static str),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: SwitchStatus,
}

#[derive(Debug, Deserialize)]
struct SwitchStatus {
    apower: f64,
    aenergy: EnergyCounter,
    voltage: Option<f64>,
    current: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EnergyCounter {
    /// Wh since the plug was last reset.
    total: f64,
}

/// Shelly Plus Plug S, queried through its local RPC endpoint.
pub struct ShellyPlug {
    name: String,
    client: Client,
    url: String,
    source_id: String,
}

impl ShellyPlug {
    pub fn new(name: &str, device_ip: &str, device_id: &str, timeout: Duration) -> Result<Self> {
        let url = format!("http://{}/rpc", device_ip);
        info!("Initializing Shelly plug {} at {}", name, url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoggerError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(ShellyPlug {
            name: name.to_string(),
            client,
            url,
            source_id: device_id.to_string(),
        })
    }

    /// Requires `device_ip` and `device_id`; `timeout_secs` is optional.
    pub fn from_params(name: &str, params: &ConnectionParams) -> Result<Self> {
        let device_ip = str_param(name, params, "device_ip")?;
        let device_id = str_param(name, params, "device_id")?;
        let timeout = params
            .get("timeout_secs")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        ShellyPlug::new(name, device_ip, device_id, Duration::from_secs_f64(timeout))
    }

    fn request_body(&self) -> String {
        format!(
            r#"{{"id":1, "src":"{}", "method":"Switch.GetStatus", "params":{{"id":0}}}}"#,
            self.source_id
        )
    }

    fn fetch(&self) -> std::result::Result<Reading, ShellyError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(self.request_body())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShellyError::Status(status));
        }

        let body = response.text()?;
        debug!("Received response from {}: {}", self.name, body);
        parse_status(&body)
    }
}

fn str_param<'a>(name: &str, params: &'a ConnectionParams, key: &'static str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| LoggerError::Configuration(format!("Device {}: {}", name, ShellyError::MissingParam(key))))
}

/// Converts a `Switch.GetStatus` payload into a reading; the energy counter
/// is reported in Wh and logged in kWh.
pub fn parse_status(body: &str) -> std::result::Result<Reading, ShellyError> {
    let response: RpcResponse = serde_json::from_str(body)?;
    let status = response.result;

    let mut reading = Reading::new(status.apower, status.aenergy.total / 1000.0);
    let mut extra = Map::new();
    if let Some(voltage) = status.voltage {
        extra.insert("voltage".into(), Value::from(voltage));
    }
    if let Some(current) = status.current {
        extra.insert("current".into(), Value::from(current));
    }
    if !extra.is_empty() {
        reading.extra = Some(extra);
    }
    Ok(reading)
}

impl DeviceReader for ShellyPlug {
    fn read(&mut self) -> Result<Reading> {
        self.fetch().map_err(|e| {
            error!("Shelly plug {} read failed: {}", self.name, e);
            LoggerError::device_read(&self.name, e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STATUS: &str = r#"{
        "id": 1,
        "src": "shellyplugsg3-abc",
        "result": {
            "id": 0,
            "source": "init",
            "output": true,
            "apower": 87.4,
            "voltage": 231.2,
            "current": 0.41,
            "aenergy": { "total": 12345.6, "by_minute": [0.0, 0.0, 0.0], "minute_ts": 1700000000 },
            "temperature": { "tC": 31.2, "tF": 88.2 }
        }
    }"#;

    #[test]
    fn parses_switch_status() {
        let reading = parse_status(STATUS).unwrap();
        assert_eq!(reading.instantaneous_draw, 87.4);
        assert!((reading.cumulative_draw - 12.3456).abs() < 1e-9);
        let extra = reading.extra.unwrap();
        assert_eq!(extra["voltage"], json!(231.2));
        assert_eq!(extra["current"], json!(0.41));
    }

    #[test]
    fn rejects_payload_without_result() {
        let err = parse_status(r#"{"id":1,"error":{"code":-103,"message":"bad"}}"#).unwrap_err();
        assert!(matches!(err, ShellyError::Parse(_)));
    }

    #[test]
    fn missing_ip_is_configuration_error() {
        let params = json!({ "device_type": "shelly", "device_id": "abc" });
        let err = ShellyPlug::from_params("desk", params.as_object().unwrap())
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("device_ip"));
    }

    #[test]
    fn request_body_names_source() {
        let params = json!({ "device_ip": "192.168.1.50", "device_id": "shelly-desk" });
        let plug = ShellyPlug::from_params("desk", params.as_object().unwrap()).unwrap();
        let body: Value = serde_json::from_str(&plug.request_body()).unwrap();
        assert_eq!(body["src"], "shelly-desk");
        assert_eq!(body["method"], "Switch.GetStatus");
        assert_eq!(plug.url, "http://192.168.1.50/rpc");
    }
}
