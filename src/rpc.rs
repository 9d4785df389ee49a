use log::debug;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the LMS JSON-RPC endpoint.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Error during HTTP request (e.g., network issues, invalid URL).
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("JSON serialization error: {0}")]
    Serialization(serde_json::Error),
    #[error("JSON deserialization error: {0}")]
    Deserialization(serde_json::Error),
    /// The LMS Server response contained an error object.
    #[error("LMS Server error: {0:?}")]
    Server(ServerError),
    #[error("LMS Server response missing 'result' field")]
    MissingResult,
    #[error("LMS Server response missing 'id' field")]
    MissingId,
    #[error("LMS Server ID mismatch: expected {expected}, received {received:?}")]
    IdMismatch { expected: u32, received: Option<u32> },
}

/// The slim.request payload.
#[derive(Debug, Serialize)]
pub struct SlimRequest {
    pub id: u32,
    pub method: &'static str,
    pub params: Vec<Value>, // (player MAC, [command, param,...])
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<u32>,
    pub result: Option<Value>,
    pub error: Option<ServerError>,
}

impl JsonRpcResponse {
    /// Validate against the request id and hand back the result.
    pub fn into_result(self, expected: u32) -> Result<Value, RpcError> {
        let Some(id) = self.id else {
            return Err(RpcError::MissingId);
        };
        if id != expected {
            return Err(RpcError::IdMismatch { expected, received: Some(id) });
        }
        if let Some(error) = self.error {
            return Err(RpcError::Server(error));
        }
        self.result.ok_or(RpcError::MissingResult)
    }
}

/// Minimal LMS JSON-RPC client.
#[derive(Debug)]
pub struct SlimClient {
    url: String,
    id: AtomicU32,
    client: Client,
}

impl SlimClient {
    pub fn new(host: &str, port: u16) -> Result<Self, RpcError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Content-Type", header::HeaderValue::from_static("application/json"));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .http1_only()
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .timeout(RPC_TIMEOUT)
            .build()?;

        Ok(SlimClient {
            url: format!("http://{}:{}/jsonrpc.js", host, port),
            id: AtomicU32::new(1),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches("/jsonrpc.js")
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Build the request body for `[command, params...]` on `player`.
    pub fn request(&self, player: &str, command: &str, params: Vec<Value>) -> SlimRequest {
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let mut cmd = vec![json!(command)];
        cmd.extend(params);
        SlimRequest {
            id,
            method: "slim.request",
            params: vec![Value::String(player.to_string()), Value::Array(cmd)],
        }
    }

    /// POST one request and return its `result`.
    pub async fn send(&self, player: &str, command: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = self.request(player, command, params);
        let body = serde_json::to_string(&req).map_err(RpcError::Serialization)?;
        debug!("rpc {} {}", self.url, body);

        let response = self.client.post(&self.url).body(body).send().await?;
        response.error_for_status_ref()?;
        let text = response.text().await?;

        let rpc: JsonRpcResponse = serde_json::from_str(&text).map_err(RpcError::Deserialization)?;
        rpc.into_result(req.id)
    }

    /// `status - 1 tags:...` for `player`.
    pub async fn status(&self, player: &str, tags: &str) -> Result<Value, RpcError> {
        self.send(player, "status", vec![json!("-"), json!(1), json!(format!("tags:{tags}"))])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape_and_ids() {
        let c = SlimClient::new("lms.local", 9000).unwrap();
        let a = c.request("aa:bb", "status", vec![json!("-"), json!(1)]);
        let b = c.request("aa:bb", "status", vec![]);
        assert_eq!(b.id, a.id + 1);
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["method"], "slim.request");
        assert_eq!(v["params"][0], "aa:bb");
        assert_eq!(v["params"][1], json!(["status", "-", 1]));
        assert_eq!(c.base_url(), "http://lms.local:9000");
    }

    #[test]
    fn response_validation() {
        let ok: JsonRpcResponse = serde_json::from_str(r#"{"id":3,"result":{"mode":"play"}}"#).unwrap();
        assert_eq!(ok.into_result(3).unwrap()["mode"], "play");

        let wrong: JsonRpcResponse = serde_json::from_str(r#"{"id":4,"result":{}}"#).unwrap();
        assert!(matches!(wrong.into_result(3), Err(RpcError::IdMismatch { expected: 3, .. })));

        let none: JsonRpcResponse = serde_json::from_str(r#"{"result":{}}"#).unwrap();
        assert!(matches!(none.into_result(1), Err(RpcError::MissingId)));

        let err: JsonRpcResponse =
            serde_json::from_str(r#"{"id":1,"error":{"code":-1,"message":"nope"}}"#).unwrap();
        assert!(matches!(err.into_result(1), Err(RpcError::Server(_))));

        let empty: JsonRpcResponse = serde_json::from_str(r#"{"id":1}"#).unwrap();
        assert!(matches!(empty.into_result(1), Err(RpcError::MissingResult)));
    }
}
