use crate::error::ServiceError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

/// API Gateway proxy response returned by the HTTP-facing functions.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

fn default_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Access-Control-Allow-Origin".to_string(), "*".to_string());
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers
}

impl ApiResponse {
    pub fn json<T: Serialize + ?Sized>(status_code: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status_code,
                headers: default_headers(),
                body,
            },
            Err(e) => {
                error!("Failed to serialize response body: {}", e);
                Self::message(500, &format!("Failed to serialize response: {}", e))
            }
        }
    }

    pub fn ok<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json(200, value)
    }

    /// Body is the message encoded as a JSON string.
    pub fn message(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            headers: default_headers(),
            body: serde_json::Value::String(message.to_string()).to_string(),
        }
    }

    pub fn from_error(err: &ServiceError) -> Self {
        Self::message(err.status_code(), &err.to_string())
    }

    /// Decode the body back into JSON. Mostly useful to callers and tests.
    pub fn body_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
