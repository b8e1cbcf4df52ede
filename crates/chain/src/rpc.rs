use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use medrec_contracts::FailureReason;

use crate::abi::AbiError;

#[derive(Debug)]
pub enum RpcError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse(String),
    /// The node or wallet answered with a JSON-RPC error object, e.g. the
    /// user declined a signature or the call reverted during estimation.
    Rejected { code: i64, message: String },
    Reverted { tx_hash: String },
    ConfirmationTimeout { tx_hash: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "JSON-RPC request timed out"),
            RpcError::Http(err) => write!(f, "JSON-RPC HTTP error: {}", err),
            RpcError::BadStatus(status) => write!(f, "JSON-RPC endpoint returned status {}", status),
            RpcError::InvalidResponse(detail) => {
                write!(f, "JSON-RPC endpoint returned an invalid response: {}", detail)
            }
            RpcError::Rejected { code, message } => {
                write!(f, "JSON-RPC error {}: {}", code, message)
            }
            RpcError::Reverted { tx_hash } => write!(f, "transaction {} reverted", tx_hash),
            RpcError::ConfirmationTimeout { tx_hash } => {
                write!(f, "transaction {} was not confirmed in time", tx_hash)
            }
        }
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    pub fn reason(&self) -> FailureReason {
        match self {
            RpcError::Timeout | RpcError::ConfirmationTimeout { .. } => FailureReason::TimedOut,
            RpcError::Http(_) | RpcError::BadStatus(_) => FailureReason::Transport,
            RpcError::InvalidResponse(_) => FailureReason::InvalidResponse,
            RpcError::Rejected { .. } => FailureReason::Rejected,
            RpcError::Reverted { .. } => FailureReason::Reverted,
        }
    }

    /// Span `outcome` value for this failure.
    pub fn outcome(&self) -> &'static str {
        match self.reason() {
            FailureReason::TimedOut => "timeout",
            FailureReason::Rejected | FailureReason::Reverted => "rejected",
            _ => "error",
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            RpcError::Timeout
        } else {
            RpcError::Http(value)
        }
    }
}

impl From<AbiError> for RpcError {
    fn from(value: AbiError) -> Self {
        RpcError::InvalidResponse(value.to_string())
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC 2.0 client over HTTP POST.
#[derive(Clone)]
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RpcError::Http)?;

        Ok(Self {
            url,
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Calls `method`; a missing or `null` result deserializes into `T` as
    /// JSON `null`, so `Option<_>` results work for "not yet" answers.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RpcError::BadStatus(resp.status()));
        }

        let decoded = resp
            .json::<RpcResponse>()
            .await
            .map_err(|_| RpcError::InvalidResponse(format!("{} response is not JSON-RPC", method)))?;

        if let Some(err) = decoded.error {
            return Err(RpcError::Rejected {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(decoded.result.unwrap_or(serde_json::Value::Null)).map_err(|_| {
            RpcError::InvalidResponse(format!("{} result has an unexpected shape", method))
        })
    }
}
