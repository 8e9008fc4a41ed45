//! Proxy for the one remote HTTP-triggered cloud function.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("function returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("function response is not JSON: {0}")]
    Decode(#[source] reqwest::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Posts JSON payloads to a fixed function URL.
///
/// No retries and no timeout beyond the client's defaults.
#[derive(Clone)]
pub struct FunctionService {
    client: reqwest::Client,
    url: String,
}

impl FunctionService {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` and return the function's JSON answer.
    pub async fn call_function(&self, payload: &Value) -> Result<Value, InvocationError> {
        self.invoke(payload).await.inspect_err(|err| {
            error!(url = %self.url, "error calling cloud function: {}", err);
        })
    }

    async fn invoke(&self, payload: &Value) -> Result<Value, InvocationError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::Status { status, body });
        }
        let result = response.json::<Value>().await.map_err(InvocationError::Decode)?;
        debug!(%status, "cloud function answered");
        Ok(result)
    }
}
