use std::time::Duration;

use thiserror::Error;

/// Why a candidate URL or a whole channel failed verification.
///
/// Every failure is local to the candidate or channel it is recorded on; none of
/// these ever abort a run. Values are cloned out of the probe memo, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("host {0} is blacklisted")]
    BlacklistedHost(String),

    #[error("probe timed out after {}s", .0.as_secs_f32())]
    ProbeTimeout(Duration),

    #[error("connection failed: {0}")]
    ProbeConnection(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid stream URL `{0}`")]
    InvalidUrl(String),

    /// `no-valid-stream`: the channel ran out of candidates or hit the fallback cap
    #[error("no valid stream after {attempts} attempt(s)")]
    FallbackExhausted { attempts: usize },

    #[error("no audio or video stream detected")]
    InvalidContentStream,

    #[error("soft error on screen: `{0}`")]
    SoftErrorDetected(String),

    #[error("run was cancelled before this channel was verified")]
    Cancelled,
}

impl VerifyError {
    /// Short machine-friendly label used in reports
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BlacklistedHost(_) => "blacklisted",
            Self::ProbeTimeout(_) => "timeout",
            Self::ProbeConnection(_) => "connection-error",
            Self::HttpStatus(_) => "http-status",
            Self::MalformedResponse(_) => "malformed-response",
            Self::InvalidUrl(_) => "invalid-url",
            Self::FallbackExhausted { .. } => "no-valid-stream",
            Self::InvalidContentStream => "invalid-content",
            Self::SoftErrorDetected(_) => "soft-error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Maps a transport error from the HTTP client onto the probe taxonomy
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::ProbeTimeout(timeout);
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus(status.as_u16());
        }
        if err.is_decode() || err.is_body() {
            return Self::MalformedResponse(err.to_string());
        }

        // reqwest wraps the interesting part (refused, dns, tls) in the source chain
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(inner) = source {
            message = inner.to_string();
            source = inner.source();
        }
        Self::ProbeConnection(message)
    }
}

/// A non-fatal note explaining why a channel was not fully deep-validated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Degradation {
    /// The tool backing a check is not installed, or deep validation is disabled
    #[error("{0} check skipped: validator unavailable")]
    ValidatorUnavailable(Check),

    #[error("{check} check inconclusive: {detail}")]
    Inconclusive { check: Check, detail: String },
}

/// The two deep validation checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Check {
    ContentStream,
    SoftError,
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ContentStream => "content-stream",
            Self::SoftError => "soft-error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reports_as_no_valid_stream() {
        let err = VerifyError::FallbackExhausted { attempts: 3 };
        assert_eq!(err.code(), "no-valid-stream");
        assert_eq!(err.to_string(), "no valid stream after 3 attempt(s)");
    }

    #[test]
    fn timeout_message_is_in_seconds() {
        let err = VerifyError::ProbeTimeout(Duration::from_millis(8000));
        assert_eq!(err.to_string(), "probe timed out after 8s");
    }

    #[test]
    fn degradation_names_the_check() {
        let note = Degradation::ValidatorUnavailable(Check::SoftError);
        assert_eq!(note.to_string(), "soft-error check skipped: validator unavailable");
    }
}
