//! Response handling shared by both service clients.

use std::time::Duration;

use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::rate_limiter::RateLimiter;

/// Sends `request` in the limiter's next slot. A 429 with `Retry-After` pauses the limiter before
/// the error surfaces, so a retried read waits as long as the server asked.
pub(crate) async fn send_paced(limiter: &RateLimiter, request: RequestBuilder) -> Result<Response> {
    limiter.acquire().await;
    let response = request.send().await?;
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        if let Some(pause) = retry_after(&response) {
            limiter.pause_for(pause).await;
        }
    }
    Ok(response)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) async fn parse_json<T>(response: Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let response = check_status(response).await?;
    response.json::<T>().await.map_err(ApiError::from)
}

pub(crate) async fn ensure_success(response: Response) -> Result<()> {
    check_status(response).await.map(|_| ())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Authentication(format!("Access denied ({}) - {}", status, body))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(path),
        _ => build_http_error(status, &body),
    })
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| ApiError::Other(err.to_string()))
}

fn build_http_error(status: StatusCode, body: &str) -> ApiError {
    ApiError::http(status, extract_error_code(body), body.to_string())
}

/// Redmine reports validation failures as `{"errors": [...]}`, Harvest as `{"error": "..."}`.
fn extract_error_code(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    if let Some(errors) = value.get("errors").and_then(Value::as_array) {
        let joined = errors
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        return (!joined.is_empty()).then_some(joined);
    }
    value
        .get("error")
        .or_else(|| value.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
