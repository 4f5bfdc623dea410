//! Service error classification.
//!
//! Providers report failures in whatever shape their transport gives them.
//! At the service boundary those failures are flattened into a
//! [`RawServiceError`] and classified exactly once into a [`ServiceError`].
//! Everything downstream (retry loop, circuit breaker, orchestrator) reads
//! only `kind` and `retryable`.
//!
//! Precedence: HTTP status, then provider error code, then message patterns.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

lazy_static! {
    static ref RATE_LIMIT_PATTERN: Regex =
        Regex::new(r"(?i)rate[ _-]?limit|too many requests|quota exceeded").unwrap();

    static ref OVERLOADED_PATTERN: Regex =
        Regex::new(r"(?i)overloaded|over capacity|at capacity").unwrap();

    static ref UNAVAILABLE_PATTERN: Regex =
        Regex::new(r"(?i)unavailable|bad gateway|gateway timeout").unwrap();

    static ref TIMEOUT_PATTERN: Regex =
        Regex::new(r"(?i)timed? ?out|timeout|deadline exceeded|etimedout").unwrap();

    static ref NETWORK_PATTERN: Regex = Regex::new(
        r"(?i)connection (reset|refused|closed|aborted)|econnreset|econnrefused|broken pipe|socket hang up"
    )
    .unwrap();

    static ref AUTH_PATTERN: Regex = Regex::new(
        r"(?i)unauthori[sz]ed|forbidden|invalid[ _-]?api[ _-]?key|authentication|permission denied"
    )
    .unwrap();

    static ref VALIDATION_PATTERN: Regex =
        Regex::new(r"(?i)invalid|malformed|validation|must be|required field").unwrap();
}

/// A failure as reported at the service boundary, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawServiceError {
    /// Provider or transport code (e.g. "rate_limit_error", "ECONNRESET")
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub http_status: Option<u16>,

    pub message: String,
}

impl RawServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            http_status: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// Normalized failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    RateLimited,
    Timeout,
    Overloaded,
    Unavailable,
    ServerError,
    Network,
    Validation,
    Authentication,
    MalformedRequest,
    Unknown,
}

impl ServiceErrorKind {
    /// Transient classes are worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ServiceErrorKind::RateLimited
                | ServiceErrorKind::Timeout
                | ServiceErrorKind::Overloaded
                | ServiceErrorKind::Unavailable
                | ServiceErrorKind::ServerError
                | ServiceErrorKind::Network
        )
    }

    /// Whether this failure says something about the dependency's health.
    ///
    /// Requests we built badly are our problem, not the service's.
    pub fn counts_against_dependency(self) -> bool {
        !matches!(
            self,
            ServiceErrorKind::Validation | ServiceErrorKind::MalformedRequest
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::RateLimited => "rate_limited",
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Overloaded => "overloaded",
            ServiceErrorKind::Unavailable => "unavailable",
            ServiceErrorKind::ServerError => "server_error",
            ServiceErrorKind::Network => "network",
            ServiceErrorKind::Validation => "validation",
            ServiceErrorKind::Authentication => "authentication",
            ServiceErrorKind::MalformedRequest => "malformed_request",
            ServiceErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified service failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {raw_message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub retryable: bool,
    pub raw_message: String,

    #[serde(default)]
    pub http_status: Option<u16>,
}

impl ServiceError {
    /// Build an error whose retryability follows from its kind.
    pub fn new(kind: ServiceErrorKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_transient(),
            raw_message: raw_message.into(),
            http_status: None,
        }
    }
}

/// Classify a raw failure.
pub fn classify(raw: &RawServiceError) -> ServiceError {
    let kind = raw
        .http_status
        .and_then(kind_from_status)
        .or_else(|| raw.code.as_deref().and_then(kind_from_code))
        .unwrap_or_else(|| kind_from_message(&raw.message));

    ServiceError {
        kind,
        retryable: kind.is_transient(),
        raw_message: raw.message.clone(),
        http_status: raw.http_status,
    }
}

/// Whether a classified failure should be retried.
pub fn is_retryable(error: &ServiceError) -> bool {
    error.retryable
}

fn kind_from_status(status: u16) -> Option<ServiceErrorKind> {
    let kind = match status {
        429 => ServiceErrorKind::RateLimited,
        408 | 504 => ServiceErrorKind::Timeout,
        529 => ServiceErrorKind::Overloaded,
        502 | 503 => ServiceErrorKind::Unavailable,
        500..=599 => ServiceErrorKind::ServerError,
        401 | 403 => ServiceErrorKind::Authentication,
        422 => ServiceErrorKind::Validation,
        400..=499 => ServiceErrorKind::MalformedRequest,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_code(code: &str) -> Option<ServiceErrorKind> {
    let kind = match code.to_ascii_lowercase().as_str() {
        "rate_limit_error" | "rate_limited" | "rate_limit_exceeded" => ServiceErrorKind::RateLimited,
        "overloaded_error" | "overloaded" => ServiceErrorKind::Overloaded,
        "timeout" | "timeout_error" | "etimedout" => ServiceErrorKind::Timeout,
        "service_unavailable" | "unavailable" => ServiceErrorKind::Unavailable,
        "api_error" | "internal_error" | "server_error" => ServiceErrorKind::ServerError,
        "econnreset" | "econnrefused" | "network_error" => ServiceErrorKind::Network,
        "authentication_error" | "permission_error" | "unauthorized" => {
            ServiceErrorKind::Authentication
        }
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ServiceErrorKind::MalformedRequest
        }
        "validation_error" => ServiceErrorKind::Validation,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_message(message: &str) -> ServiceErrorKind {
    if RATE_LIMIT_PATTERN.is_match(message) {
        ServiceErrorKind::RateLimited
    } else if OVERLOADED_PATTERN.is_match(message) {
        ServiceErrorKind::Overloaded
    } else if UNAVAILABLE_PATTERN.is_match(message) {
        ServiceErrorKind::Unavailable
    } else if TIMEOUT_PATTERN.is_match(message) {
        ServiceErrorKind::Timeout
    } else if NETWORK_PATTERN.is_match(message) {
        ServiceErrorKind::Network
    } else if AUTH_PATTERN.is_match(message) {
        ServiceErrorKind::Authentication
    } else if VALIDATION_PATTERN.is_match(message) {
        ServiceErrorKind::Validation
    } else {
        ServiceErrorKind::Unknown
    }
}
