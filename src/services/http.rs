use std::time::Duration as StdDuration;

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::error::{AppError, AppResult};

const MAX_RETRIES: usize = 5;
const MAX_BACKOFF_SECS: u64 = 60;

/// Send a request, retrying on rate limiting and transient failures.
///
/// - `429` is retried without bound, sleeping until the window announced by
///   `Ratelimit-Reset` (epoch seconds) or `Retry-After`, falling back to an
///   exponential backoff.
/// - `5xx` and network errors are retried up to `MAX_RETRIES` times.
/// - Every other status is handed back; callers decide what non-success means.
pub async fn send_with_backoff<F>(service: &str, make_request: F) -> AppResult<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut backoff_secs: u64 = 1;
    let mut failures: usize = 0;

    loop {
        match (make_request)().send().await {
            Ok(resp) => {
                if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                    let wait = rate_limit_wait(resp.headers(), Utc::now().timestamp(), backoff_secs);
                    tracing::warn!(
                        "{} rate limit reached. Retrying in {}s",
                        service,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, MAX_BACKOFF_SECS);
                    continue;
                }

                if resp.status().is_server_error() && failures + 1 < MAX_RETRIES {
                    failures += 1;
                    tracing::warn!(
                        "Transient {} error (status: {}). Retrying in {}s (attempt {}/{})",
                        service,
                        resp.status(),
                        backoff_secs,
                        failures,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(StdDuration::from_secs(backoff_secs)).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, MAX_BACKOFF_SECS);
                    continue;
                }

                return Ok(resp);
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_RETRIES {
                    return Err(AppError::Request(e));
                }
                tracing::warn!(
                    "{} request failed: {}. Retrying in {}s (attempt {}/{})",
                    service,
                    e,
                    backoff_secs,
                    failures,
                    MAX_RETRIES
                );
                tokio::time::sleep(StdDuration::from_secs(backoff_secs)).await;
                backoff_secs = std::cmp::min(backoff_secs * 2, MAX_BACKOFF_SECS);
            }
        }
    }
}

/// How long to wait after a `429`, given the response headers and the current epoch second.
pub fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64, fallback_secs: u64) -> StdDuration {
    let header_i64 = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    if let Some(reset) = header_i64("ratelimit-reset") {
        // At least one second so a reset already in the past does not spin
        return StdDuration::from_secs((reset - now_epoch).max(1) as u64);
    }

    if let Some(retry_after) = header_i64("retry-after") {
        return StdDuration::from_secs(retry_after.max(1) as u64);
    }

    StdDuration::from_secs(fallback_secs)
}

/// Turn a non-success response into an error carrying the upstream body.
pub async fn error_text(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{} {}", status, body)
}
