//! The single boundary translating HTTP transport failures into the closed
//! error set. Both reqwest-backed clients route responses through here.

use std::time::Duration;

use orbit_core::{OrbitError, Result};

/// Map a transport-level failure (connect, DNS, body read) to a kind.
pub(crate) fn classify_transport(context: &str, e: reqwest::Error) -> OrbitError {
    if e.is_timeout() {
        OrbitError::timeout(format!("{context}: request timed out"))
    } else {
        OrbitError::transient(format!("{context}: {e}"))
    }
}

/// Resolve a response: success passes through, anything else becomes a
/// classified error. The body is logged for diagnosis, never surfaced.
pub(crate) async fn ensure_success(
    context: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(context, status = status.as_u16(), body = %truncate(&body, 512), "http error response");

    Err(classify_status(context, status.as_u16(), retry_after, &body))
}

pub(crate) fn classify_status(
    context: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> OrbitError {
    let message = format!("{context}: upstream returned {status}");
    match status {
        401 | 403 => OrbitError::permission_denied(message),
        404 => OrbitError::not_found(message),
        409 => OrbitError::conflict(message),
        422 => {
            if body.contains("already exists") {
                OrbitError::conflict(message).with_code("NAME_CONFLICT")
            } else {
                OrbitError::validation(message)
            }
        }
        429 => OrbitError::rate_limited(retry_after, message),
        400..=499 => OrbitError::validation(message),
        _ => OrbitError::transient(message),
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use orbit_core::ErrorKind;

    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status("cms", 401, None, "").kind,
            ErrorKind::PermissionDenied
        );
        assert_eq!(classify_status("cms", 404, None, "").kind, ErrorKind::NotFound);
        assert_eq!(classify_status("cms", 409, None, "").kind, ErrorKind::Conflict);
        assert_eq!(classify_status("cms", 400, None, "").kind, ErrorKind::Validation);
        assert_eq!(classify_status("cms", 500, None, "").kind, ErrorKind::Transient);
        assert_eq!(classify_status("cms", 503, None, "").kind, ErrorKind::Transient);
    }

    #[test]
    fn name_conflict_is_read_from_422_body() {
        let err = classify_status(
            "github",
            422,
            None,
            "{\"errors\":[{\"message\":\"name already exists on this account\"}]}",
        );
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code_str(), "NAME_CONFLICT");

        let plain = classify_status("github", 422, None, "{\"message\":\"invalid field\"}");
        assert_eq!(plain.kind, ErrorKind::Validation);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = classify_status("github", 429, Some(Duration::from_secs(30)), "");
        match err.kind {
            ErrorKind::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
