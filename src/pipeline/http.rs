//! Shared HTTP plumbing for the OCR and LLM REST clients.
//!
//! Both services speak JSON over HTTPS and fail in the same handful of ways,
//! so status and transport errors are mapped to [`ServiceError`] in one place.
//! No retries happen here; a failed call fails its pipeline stage.

use crate::error::ServiceError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Build a client with the per-call timeout applied.
pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Send a prepared request and decode the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str,
    request: reqwest::RequestBuilder,
    timeout_secs: u64,
) -> Result<T, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(service, &e, timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(service, status.as_u16(), body, retry_after));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(service, &e, timeout_secs))?;
    debug!("{}: {} bytes received", service, bytes.len());

    serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode {
        service,
        detail: e.to_string(),
    })
}

/// Map a non-success HTTP status to the matching [`ServiceError`].
pub(crate) fn status_error(
    service: &'static str,
    status: u16,
    body: String,
    retry_after_secs: Option<u64>,
) -> ServiceError {
    let body = truncate(body);
    match status {
        401 | 403 => ServiceError::Auth {
            service,
            detail: body,
        },
        429 => ServiceError::RateLimited {
            service,
            retry_after_secs,
        },
        _ => ServiceError::Http {
            service,
            status,
            body,
        },
    }
}

fn transport_error(service: &'static str, e: &reqwest::Error, timeout_secs: u64) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout {
            service,
            secs: timeout_secs,
        }
    } else {
        ServiceError::Transport {
            service,
            detail: e.to_string(),
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth() {
        assert!(matches!(
            status_error("gemini", 401, "bad key".into(), None),
            ServiceError::Auth { .. }
        ));
        assert!(matches!(
            status_error("gemini", 403, String::new(), None),
            ServiceError::Auth { .. }
        ));
    }

    #[test]
    fn too_many_requests_keeps_retry_after() {
        match status_error("mistral-ocr", 429, String::new(), Some(12)) {
            ServiceError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, Some(12)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "é".repeat(600);
        match status_error("gemini", 500, body, None) {
            ServiceError::Http { body, status, .. } => {
                assert_eq!(status, 500);
                assert!(body.len() <= MAX_ERROR_BODY + '…'.len_utf8());
                assert!(body.ends_with('…'));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
