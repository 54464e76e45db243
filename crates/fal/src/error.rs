//! Typed failures surfaced by the generation client.

use serde::Serialize;

use crate::transport::TransportError;

/// Where to top up credits.
pub const BILLING_URL: &str = "https://fal.ai/dashboard/billing";

/// Where to create or rotate API keys.
pub const API_KEYS_URL: &str = "https://fal.ai/dashboard/keys";

/// A follow-up the user can take to resolve a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemedialAction {
    pub label: &'static str,
    pub url: &'static str,
}

/// Closed set of generation failures.
///
/// `Display` is the short user-facing message; [`remedy`](Self::remedy)
/// adds an action for the failures a user can fix themselves.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Rate limit exceeded. Wait a moment and try again")]
    RateLimited { detail: Option<String> },

    #[error("Insufficient credits on the fal.ai account")]
    InsufficientCredits { detail: Option<String> },

    #[error("Invalid or missing fal.ai API key")]
    InvalidCredential { detail: Option<String> },

    #[error("fal.ai server error ({status}). Try again later")]
    UpstreamServerError { status: u16, detail: Option<String> },

    #[error("The model returned no images")]
    NoImagesReturned,

    #[error("Generation failed: {message}")]
    Unknown {
        message: String,
        status: Option<u16>,
    },
}

impl GenerationError {
    /// Classify a non-2xx provider status.
    ///
    /// - 429 -> `RateLimited`
    /// - 402 -> `InsufficientCredits`
    /// - 401 -> `InvalidCredential`
    /// - 5xx -> `UpstreamServerError`
    /// - anything else -> `Unknown` carrying the status
    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        match status {
            429 => GenerationError::RateLimited { detail },
            402 => GenerationError::InsufficientCredits { detail },
            401 => GenerationError::InvalidCredential { detail },
            500..=599 => GenerationError::UpstreamServerError { status, detail },
            _ => GenerationError::Unknown {
                message: match detail {
                    Some(d) => format!("upstream rejected the request ({status}): {d}"),
                    None => format!("upstream rejected the request ({status})"),
                },
                status: Some(status),
            },
        }
    }

    /// Only rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. } | GenerationError::UpstreamServerError { .. }
        )
    }

    /// HTTP status behind the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::RateLimited { .. } => Some(429),
            GenerationError::InsufficientCredits { .. } => Some(402),
            GenerationError::InvalidCredential { .. } => Some(401),
            GenerationError::UpstreamServerError { status, .. } => Some(*status),
            GenerationError::NoImagesReturned => None,
            GenerationError::Unknown { status, .. } => *status,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GenerationError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            GenerationError::InvalidCredential { .. } => "INVALID_API_KEY",
            GenerationError::UpstreamServerError { .. } => "SERVER_ERROR",
            GenerationError::NoImagesReturned => "NO_IMAGES_RETURNED",
            GenerationError::Unknown { .. } => "GENERATION_FAILED",
        }
    }

    /// Upstream's own explanation, if it sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            GenerationError::RateLimited { detail }
            | GenerationError::InsufficientCredits { detail }
            | GenerationError::InvalidCredential { detail }
            | GenerationError::UpstreamServerError { detail, .. } => detail.as_deref(),
            GenerationError::NoImagesReturned | GenerationError::Unknown { .. } => None,
        }
    }

    pub fn remedy(&self) -> Option<RemedialAction> {
        match self {
            GenerationError::InsufficientCredits { .. } => Some(RemedialAction {
                label: "Add credits",
                url: BILLING_URL,
            }),
            GenerationError::InvalidCredential { .. } => Some(RemedialAction {
                label: "Manage API keys",
                url: API_KEYS_URL,
            }),
            _ => None,
        }
    }
}

impl From<TransportError> for GenerationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status, detail } => {
                let detail = Some(detail).filter(|d| !d.trim().is_empty());
                GenerationError::from_status(status, detail)
            }
            TransportError::Network(message) => GenerationError::Unknown {
                message: format!("network error: {message}"),
                status: None,
            },
            TransportError::Decode(message) => GenerationError::Unknown {
                message: format!("malformed response: {message}"),
                status: None,
            },
            TransportError::Timeout(message) => GenerationError::Unknown {
                message: format!("timed out: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn statuses_map_to_variants() {
        assert_matches!(GenerationError::from_status(429, None), GenerationError::RateLimited { .. });
        assert_matches!(
            GenerationError::from_status(402, None),
            GenerationError::InsufficientCredits { .. }
        );
        assert_matches!(
            GenerationError::from_status(401, None),
            GenerationError::InvalidCredential { .. }
        );
        assert_matches!(
            GenerationError::from_status(503, None),
            GenerationError::UpstreamServerError { status: 503, .. }
        );
        assert_matches!(
            GenerationError::from_status(422, Some("bad size".into())),
            GenerationError::Unknown { status: Some(422), message } if message.contains("bad size")
        );
    }

    #[test]
    fn only_rate_limits_and_server_errors_retry() {
        assert!(GenerationError::from_status(429, None).is_retryable());
        assert!(GenerationError::from_status(500, None).is_retryable());
        assert!(!GenerationError::from_status(401, None).is_retryable());
        assert!(!GenerationError::from_status(402, None).is_retryable());
        assert!(!GenerationError::from_status(422, None).is_retryable());
        assert!(!GenerationError::NoImagesReturned.is_retryable());
    }

    #[test]
    fn remedies_exist_only_for_account_problems() {
        let credits = GenerationError::from_status(402, None).remedy().unwrap();
        assert_eq!(credits.url, BILLING_URL);
        let keys = GenerationError::from_status(401, None).remedy().unwrap();
        assert_eq!(keys.url, API_KEYS_URL);
        assert!(GenerationError::from_status(429, None).remedy().is_none());
        assert!(GenerationError::NoImagesReturned.remedy().is_none());
    }

    #[test]
    fn network_failures_are_unknown_and_final() {
        let err = GenerationError::from(TransportError::Network("connection refused".into()));
        assert_matches!(&err, GenerationError::Unknown { status: None, .. });
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn blank_detail_is_dropped() {
        let err = GenerationError::from(TransportError::Status {
            status: 429,
            detail: "  ".into(),
        });
        assert_eq!(err, GenerationError::RateLimited { detail: None });
    }
}
