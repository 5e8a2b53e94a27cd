//! Shared HTTP plumbing: one timeout-bounded client per adapter and the
//! mapping from transport/status failures onto [`ServiceError`].

use crate::error::ServiceError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = "shortsmith/0.1";

pub fn client(service: &'static str, timeout: Duration) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ServiceError::Unavailable {
            service,
            message: format!("building HTTP client: {}", e),
        })
}

/// Maps a non-success status onto the closed taxonomy.
pub fn classify_status(service: &'static str, status: StatusCode, body: &str) -> ServiceError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited { service, message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized { service, message },
        StatusCode::REQUEST_TIMEOUT => ServiceError::Unavailable { service, message },
        s if s.is_server_error() => ServiceError::Unavailable { service, message },
        _ => ServiceError::InvalidResponse { service, message },
    }
}

/// Transport failures: timeouts and connection problems are transient,
/// anything that got as far as a body is the provider's fault.
pub fn classify_transport(service: &'static str, err: reqwest::Error) -> ServiceError {
    let message = err.to_string();
    if err.is_decode() || err.is_body() {
        ServiceError::InvalidResponse { service, message }
    } else if let Some(status) = err.status() {
        classify_status(service, status, &message)
    } else {
        ServiceError::Unavailable { service, message }
    }
}

pub fn invalid(service: &'static str, message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidResponse {
        service,
        message: message.into(),
    }
}

/// Sends the request and returns the body bytes of a successful response.
pub async fn send_bytes(service: &'static str, request: RequestBuilder) -> Result<Vec<u8>, ServiceError> {
    let response = request.send().await.map_err(|e| classify_transport(service, e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }
    let bytes = response.bytes().await.map_err(|e| classify_transport(service, e))?;
    debug!("{} answered {} bytes", service, bytes.len());
    Ok(bytes.to_vec())
}

/// Sends the request and decodes a successful JSON response.
pub async fn send_json<T: DeserializeOwned>(service: &'static str, request: RequestBuilder) -> Result<T, ServiceError> {
    let body = send_bytes(service, request).await?;
    serde_json::from_slice(&body).map_err(|e| invalid(service, format!("decoding JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn statuses_map_onto_taxonomy() {
        let kind = |code: u16| classify_status("svc", StatusCode::from_u16(code).unwrap(), "").kind();
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(401), ErrorKind::Unauthorized);
        assert_eq!(kind(403), ErrorKind::Unauthorized);
        assert_eq!(kind(408), ErrorKind::Unavailable);
        assert_eq!(kind(500), ErrorKind::Unavailable);
        assert_eq!(kind(503), ErrorKind::Unavailable);
        assert_eq!(kind(400), ErrorKind::InvalidResponse);
        assert_eq!(kind(404), ErrorKind::InvalidResponse);
    }

    #[test]
    fn status_message_is_truncated() {
        let body = "x".repeat(1_000);
        let err = classify_status("svc", StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 300);
        assert_eq!(err.service(), "svc");
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let client = client("svc", Duration::from_millis(500)).unwrap();
        // Port 9 on localhost: nothing listens there in test environments.
        let err = send_bytes("svc", client.get("http://127.0.0.1:9/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
