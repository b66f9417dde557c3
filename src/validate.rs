use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    error::{Check, Degradation, VerifyError},
    model::{CandidateState, StreamKind},
};

/// Result of one deep validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(VerifyError),
    /// The check ran but could not reach a verdict (timeout, tool error, no frame)
    Inconclusive(String),
}

/// Confirms that a URL carries at least one audio or video stream
#[async_trait]
pub trait ContentCheck: Send + Sync {
    async fn check(&self, url: &str) -> CheckOutcome;
}

/// Looks for blocking messages (login walls, region locks) on screen
#[async_trait]
pub trait SoftErrorCheck: Send + Sync {
    async fn check(&self, url: &str) -> CheckOutcome;
}

/// Which optional checks are backed by an installed tool.
///
/// Resolved once at startup; a `None` check is skipped for every channel.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub content: Option<Arc<dyn ContentCheck>>,
    pub soft_error: Option<Arc<dyn SoftErrorCheck>>,
}

impl Capabilities {
    /// No deep validation at all
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    pub fn log_summary(&self) {
        if self.content.is_some() {
            info!("ffprobe available, non-playlist streams get a content check");
        } else {
            warn!("ffprobe unavailable, skipping content-stream checks");
        }
        if self.soft_error.is_some() {
            info!("ffmpeg + tesseract available, accepted streams get an on-screen soft error check");
        } else {
            warn!("ffmpeg/tesseract unavailable, skipping soft error checks");
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("content", &self.content.is_some())
            .field("soft_error", &self.soft_error.is_some())
            .finish()
    }
}

/// What stage 3 decided for one provisionally accepted channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub state: CandidateState,
    pub rejection: Option<VerifyError>,
    pub degradations: Vec<Degradation>,
}

/// Runs the optional deep checks with their own timeouts
#[derive(Debug, Clone)]
pub struct Validator {
    capabilities: Capabilities,
    content_timeout: Duration,
    soft_error_timeout: Duration,
}

impl Validator {
    #[must_use]
    pub const fn new(capabilities: Capabilities, content_timeout: Duration, soft_error_timeout: Duration) -> Self {
        Self {
            capabilities,
            content_timeout,
            soft_error_timeout,
        }
    }

    /// Whether validating a stream of `kind` would run any external check
    #[must_use]
    pub fn has_checks_for(&self, kind: StreamKind) -> bool {
        self.capabilities.soft_error.is_some() || (!kind.is_segmented() && self.capabilities.content.is_some())
    }

    /// Validates the winning URL of a channel currently in `state`.
    ///
    /// Never downgrades because of a missing tool or an inconclusive check.
    pub async fn validate(&self, url: &str, kind: StreamKind, state: CandidateState) -> Validation {
        let mut degradations = Vec::new();
        let mut conclusive = true;

        // Segmented playlists were already confirmed format-valid by the probe
        if !kind.is_segmented() {
            let outcome = match &self.capabilities.content {
                Some(checker) => Some(bounded(self.content_timeout, checker.check(url)).await),
                None => None,
            };
            if let Some(rejection) = settle(Check::ContentStream, outcome, &mut degradations, &mut conclusive) {
                return Validation::rejected(CandidateState::RejectedInvalidContent, rejection, degradations);
            }
        }

        let outcome = match &self.capabilities.soft_error {
            Some(checker) => Some(bounded(self.soft_error_timeout, checker.check(url)).await),
            None => None,
        };
        if let Some(rejection) = settle(Check::SoftError, outcome, &mut degradations, &mut conclusive) {
            return Validation::rejected(CandidateState::RejectedSoftError, rejection, degradations);
        }

        // A skipped check leaves the prior state; the degradation carries the flag
        let state = if conclusive && degradations.is_empty() {
            CandidateState::AcceptedDeepValidated
        } else {
            state
        };

        Validation {
            state,
            rejection: None,
            degradations,
        }
    }
}

impl Validation {
    fn rejected(state: CandidateState, rejection: VerifyError, degradations: Vec<Degradation>) -> Self {
        Self {
            state,
            rejection: Some(rejection),
            degradations,
        }
    }
}

async fn bounded(timeout: Duration, check: impl Future<Output = CheckOutcome>) -> CheckOutcome {
    tokio::time::timeout(timeout, check)
        .await
        .unwrap_or_else(|_| CheckOutcome::Inconclusive(format!("timed out after {}s", timeout.as_secs())))
}

/// Records the outcome of a check and returns the rejection, if any
fn settle(
    check: Check,
    outcome: Option<CheckOutcome>,
    degradations: &mut Vec<Degradation>,
    conclusive: &mut bool,
) -> Option<VerifyError> {
    match outcome {
        None => {
            degradations.push(Degradation::ValidatorUnavailable(check));
            None
        }
        Some(CheckOutcome::Pass) => None,
        Some(CheckOutcome::Fail(err)) => {
            debug!("{check} check failed: {err}");
            Some(err)
        }
        Some(CheckOutcome::Inconclusive(detail)) => {
            *conclusive = false;
            degradations.push(Degradation::Inconclusive { check, detail });
            None
        }
    }
}
