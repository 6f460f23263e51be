use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::warn;

use crate::error::ApiError;

/// Build the shared HTTP client. Every external call is bounded by `timeout`.
pub fn client(timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::from_reqwest("http", e))
}

/// Send a request and turn non-success statuses into `ApiError::Upstream`.
pub async fn send_checked(service: &'static str, request: RequestBuilder) -> Result<Response, ApiError> {
    let resp = request
        .send()
        .await
        .map_err(|e| ApiError::from_reqwest(service, e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    warn!("{} request failed with {}: {}", service, status, body);
    Err(ApiError::Upstream {
        service,
        status,
        body,
    })
}

/// Read a JSON body, reporting decode failures as malformed responses.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    service: &'static str,
    resp: Response,
) -> Result<T, ApiError> {
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::from_reqwest(service, e))?;
    serde_json::from_str(&text).map_err(|e| ApiError::malformed(service, e.to_string()))
}
