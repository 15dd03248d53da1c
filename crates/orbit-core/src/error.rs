use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds shared by every adapter, activity, and workflow.
///
/// Adapters translate transport errors into this set at the boundary;
/// workflow code branches on the kind, never on the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input rejected; retrying the same input cannot succeed.
    Validation,
    /// Referenced entity does not exist.
    NotFound,
    /// Caller is not allowed to perform the operation.
    PermissionDenied,
    /// Target already exists or the name is taken.
    Conflict,
    /// Key material is unusable or a seal failed to open.
    CryptoError,
    /// A stored token is past (or within the skew of) its expiry.
    TokenExpired,
    /// Remote asked us to slow down; `retry_after` carries its hint.
    RateLimited { retry_after: Option<Duration> },
    /// Network failure or remote 5xx; safe to retry.
    Transient,
    /// An attempt exceeded its deadline.
    Timeout,
    /// The run was cancelled.
    Cancelled,
    /// A resource quota refused the operation.
    QuotaExceeded,
    /// The user never answered a required signal.
    UserAbandoned,
    /// Worker startup configuration problem; never raised inside a run.
    Config,
    /// Bug or unclassifiable failure.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Conflict => "CONFLICT",
            Self::CryptoError => "CRYPTO_ERROR",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Transient => "TRANSIENT",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::UserAbandoned => "USER_ABANDONED",
            Self::Config => "CONFIG",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether an activity attempt that failed with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Transient | Self::Timeout
        )
    }
}

/// Error type carried through every fallible path in the orchestrator.
///
/// `code` is the stable, user-visible failure discriminator
/// (`NAME_CONFLICT`, `BIFROST_UNAVAILABLE`, ...) where one exists beyond the
/// kind itself.
#[derive(Error, Debug, Clone)]
#[error("{}: {message}", kind.as_str())]
pub struct OrbitError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    pub correlation_id: Option<String>,
}

impl OrbitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            correlation_id: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CryptoError, message)
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenExpired, message).with_code("TOKEN_EXPIRED")
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited { retry_after }, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message).with_code("QUOTA_EXCEEDED")
    }

    pub fn user_abandoned(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserAbandoned, message).with_code("USER_ABANDONED")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The stable failure code: the explicit `code` where set, the kind
    /// otherwise.
    pub fn code_str(&self) -> &str {
        self.code.as_deref().unwrap_or_else(|| self.kind.as_str())
    }

    /// The shape returned to users. Adapter payloads and internals are
    /// logged, never serialized here.
    pub fn user_facing(&self) -> UserFacingError {
        UserFacingError {
            kind: self.kind.as_str().to_string(),
            code: self.code_str().to_string(),
            human_message: self.message.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "VALIDATION" => Self::Validation,
            "NOT_FOUND" => Self::NotFound,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "CONFLICT" => Self::Conflict,
            "CRYPTO_ERROR" => Self::CryptoError,
            "TOKEN_EXPIRED" => Self::TokenExpired,
            "RATE_LIMITED" => Self::RateLimited { retry_after: None },
            "TRANSIENT" => Self::Transient,
            "TIMEOUT" => Self::Timeout,
            "CANCELLED" => Self::Cancelled,
            "QUOTA_EXCEEDED" => Self::QuotaExceeded,
            "USER_ABANDONED" => Self::UserAbandoned,
            "CONFIG" => Self::Config,
            _ => Self::Internal,
        })
    }
}

/// Failure surface returned by queries and terminal run records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub kind: String,
    pub code: String,
    pub human_message: String,
    pub correlation_id: Option<String>,
}

impl UserFacingError {
    /// Rehydrate an [`OrbitError`], e.g. when a child run's terminal record
    /// propagates to its parent.
    pub fn to_error(&self) -> OrbitError {
        let kind = self.kind.parse().unwrap_or(ErrorKind::Internal);
        let mut err = OrbitError::new(kind, self.human_message.clone());
        if self.code != err.kind.as_str() {
            err = err.with_code(self.code.clone());
        }
        if let Some(id) = &self.correlation_id {
            err = err.with_correlation(id.clone());
        }
        err
    }
}

impl From<serde_json::Error> for OrbitError {
    fn from(e: serde_json::Error) -> Self {
        OrbitError::internal(format!("serialization failed: {e}"))
    }
}

impl From<std::io::Error> for OrbitError {
    fn from(e: std::io::Error) -> Self {
        OrbitError::transient(format!("io error: {e}"))
    }
}

/// Result alias using [`OrbitError`].
pub type Result<T> = std::result::Result<T, OrbitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited { retry_after: None }.is_retryable());

        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::CryptoError.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::QuotaExceeded.is_retryable());
    }

    #[test]
    fn code_falls_back_to_kind() {
        let plain = OrbitError::conflict("repository exists");
        assert_eq!(plain.code_str(), "CONFLICT");

        let coded = OrbitError::conflict("repository exists").with_code("NAME_CONFLICT");
        assert_eq!(coded.code_str(), "NAME_CONFLICT");
        assert_eq!(coded.user_facing().code, "NAME_CONFLICT");
    }

    #[test]
    fn user_facing_carries_correlation() {
        let err = OrbitError::transient("bifrost unreachable").with_correlation("run-42");
        let surface = err.user_facing();
        assert_eq!(surface.kind, "TRANSIENT");
        assert_eq!(surface.correlation_id.as_deref(), Some("run-42"));
    }
}
