//! Error types for HERALD operations
//!
//! Every fallible call in the workspace returns [`HeraldResult`]. Errors carry a
//! machine-readable [`ErrorCode`], the [`ErrorCategory`] it belongs to, and a
//! `retryable` flag that the request executor inspects instead of matching on
//! error shapes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR CATEGORY
// ============================================================================

/// Coarse error taxonomy used for reporting and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Provider,
    RateLimit,
    Store,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Provider => "PROVIDER",
            Self::RateLimit => "RATE_LIMIT",
            Self::Store => "STORE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ERROR CODE
// ============================================================================

/// Machine-readable error codes.
///
/// Each code maps to exactly one [`ErrorCategory`] and a default retry
/// disposition. `ProviderHttp` is the only code whose retryability depends on
/// the concrete HTTP status and is decided at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation
    // ========================================================================
    /// Caller supplied an unusable request
    InvalidInput,
    /// Configuration failed validation
    InvalidConfig,
    /// Generated report violates the report schema
    ReportInvalid,
    /// Validator reported insufficient evidence
    EvidenceInsufficient,
    /// Supplement retry budget was exhausted
    SupplementExhausted,

    // ========================================================================
    // Rate limiting
    // ========================================================================
    /// Upstream kept answering 429 after the retry budget
    ProviderRateLimited,
    /// A rate limit was hit while fetching supplemental evidence
    SupplementRateLimited,

    // ========================================================================
    // Provider
    // ========================================================================
    /// Upstream answered with a non-success HTTP status
    ProviderHttp,
    /// Upstream did not answer within the hard timeout
    ProviderTimeout,
    /// Connection-level failure talking to upstream
    ProviderTransport,
    /// Upstream payload could not be parsed or lacked required fields
    ProviderPayload,
    /// Report generation failed
    GenerationFailed,
    /// Publishing the rendered report failed
    PublishFailed,

    // ========================================================================
    // Store
    // ========================================================================
    /// Persistent storage rejected an operation
    StoreFailed,

    // ========================================================================
    // Internal
    // ========================================================================
    /// A pipeline step ran without the context keys it requires
    StepInputMissing,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// Category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidInput
            | ErrorCode::InvalidConfig
            | ErrorCode::ReportInvalid
            | ErrorCode::EvidenceInsufficient
            | ErrorCode::SupplementExhausted => ErrorCategory::Validation,

            ErrorCode::ProviderRateLimited | ErrorCode::SupplementRateLimited => {
                ErrorCategory::RateLimit
            }

            ErrorCode::ProviderHttp
            | ErrorCode::ProviderTimeout
            | ErrorCode::ProviderTransport
            | ErrorCode::ProviderPayload
            | ErrorCode::GenerationFailed
            | ErrorCode::PublishFailed => ErrorCategory::Provider,

            ErrorCode::StoreFailed => ErrorCategory::Store,

            ErrorCode::StepInputMissing | ErrorCode::Internal => ErrorCategory::Internal,
        }
    }

    /// Whether errors with this code are transient by default.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProviderTimeout
                | ErrorCode::ProviderTransport
                | ErrorCode::ProviderRateLimited
        )
    }

    /// Stable string form, identical to the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::ReportInvalid => "REPORT_INVALID",
            ErrorCode::EvidenceInsufficient => "EVIDENCE_INSUFFICIENT",
            ErrorCode::SupplementExhausted => "SUPPLEMENT_EXHAUSTED",
            ErrorCode::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ErrorCode::SupplementRateLimited => "SUPPLEMENT_RATE_LIMITED",
            ErrorCode::ProviderHttp => "PROVIDER_HTTP",
            ErrorCode::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorCode::ProviderTransport => "PROVIDER_TRANSPORT",
            ErrorCode::ProviderPayload => "PROVIDER_PAYLOAD",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::PublishFailed => "PUBLISH_FAILED",
            ErrorCode::StoreFailed => "STORE_FAILED",
            ErrorCode::StepInputMissing => "STEP_INPUT_MISSING",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PROVIDER FAILURE CONTEXT
// ============================================================================

/// Upstream request context attached to provider errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Provider name (e.g. "market", "search:update")
    pub provider: String,
    /// HTTP status, absent for timeouts and transport failures
    pub status: Option<u16>,
    /// Request URL without credentials
    pub url: String,
    /// Attempts made before surfacing the error
    pub attempts: u32,
}

// ============================================================================
// HERALD ERROR
// ============================================================================

/// Master error type for all HERALD errors.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct HeraldError {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Category derived from the code
    pub category: ErrorCategory,
    /// Whether the failed operation may succeed if repeated
    pub retryable: bool,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Optional hint for the operator or the next pipeline attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Upstream request context for provider failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderFailure>,
}

impl HeraldError {
    /// Create an error with the code's default category and retryability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category: code.category(),
            retryable: code.default_retryable(),
            details: None,
            suggestion: None,
            provider: None,
        }
    }

    /// Override the retry disposition.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach upstream request context.
    pub fn with_provider(mut self, provider: ProviderFailure) -> Self {
        self.provider = Some(provider);
        self
    }

    /// HTTP status of the upstream failure, if any.
    pub fn status(&self) -> Option<u16> {
        self.provider.as_ref().and_then(|p| p.status)
    }

    pub fn is_rate_limit(&self) -> bool {
        self.category == ErrorCategory::RateLimit
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_config(field: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidConfig,
            format!("Invalid value for {}: {}", field, reason),
        )
    }

    /// Upstream payload that will not improve on retry.
    pub fn payload(provider: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProviderPayload,
            format!("Invalid response from {}: {}", provider, reason.into()),
        )
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreFailed, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, reason)
    }

    pub fn missing_input(step: &str, key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::StepInputMissing,
            format!("Step '{}' requires '{}' which no earlier step produced", step, key),
        )
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

/// Result type alias for HERALD operations.
pub type HeraldResult<T> = Result<T, HeraldError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::InvalidInput.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::ProviderRateLimited.category(), ErrorCategory::RateLimit);
        assert_eq!(ErrorCode::SupplementRateLimited.category(), ErrorCategory::RateLimit);
        assert_eq!(ErrorCode::ProviderPayload.category(), ErrorCategory::Provider);
        assert_eq!(ErrorCode::StoreFailed.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::StepInputMissing.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_default_retryable() {
        assert!(HeraldError::new(ErrorCode::ProviderTimeout, "t").retryable);
        assert!(HeraldError::new(ErrorCode::ProviderTransport, "t").retryable);
        assert!(!HeraldError::payload("market", "missing id").retryable);
        assert!(!HeraldError::store("disk full").retryable);
        assert!(!HeraldError::new(ErrorCode::SupplementExhausted, "x").retryable);
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = HeraldError::payload("market", "no markets");
        let msg = err.to_string();
        assert!(msg.starts_with("PROVIDER_PAYLOAD"));
        assert!(msg.contains("no markets"));
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::SupplementRateLimited).unwrap();
        assert_eq!(json, "\"SUPPLEMENT_RATE_LIMITED\"");
        assert_eq!(ErrorCode::SupplementRateLimited.as_str(), "SUPPLEMENT_RATE_LIMITED");
    }

    #[test]
    fn test_provider_context() {
        let err = HeraldError::new(ErrorCode::ProviderHttp, "boom")
            .with_retryable(true)
            .with_provider(ProviderFailure {
                provider: "book".to_string(),
                status: Some(503),
                url: "https://clob.example/book".to_string(),
                attempts: 3,
            });
        assert_eq!(err.status(), Some(503));
        assert!(err.retryable);
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_error_roundtrips_through_json() {
        let err = HeraldError::new(ErrorCode::EvidenceInsufficient, "need more")
            .with_suggestion("search counter lane");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "EVIDENCE_INSUFFICIENT");
        assert_eq!(json["category"], "VALIDATION");
        assert!(json.get("provider").is_none());
        let back: HeraldError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
