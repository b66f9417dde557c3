use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Degradation, VerifyError};

/// A logical channel and its candidate stream URLs, most preferred first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Normalized display name
    pub name: String,
    pub urls: Vec<String>,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
}

impl ChannelRecord {
    pub fn new(name: impl Into<String>, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// What a reachable URL turned out to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    /// HLS master playlist (variant list)
    MasterPlaylist,
    /// HLS media playlist (segment list)
    MediaPlaylist,
    /// Anything else: raw TS, FLV, progressive MP4, ...
    Other,
}

impl StreamKind {
    #[must_use]
    pub const fn is_segmented(self) -> bool {
        matches!(self, Self::MasterPlaylist | Self::MediaPlaylist)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::MasterPlaylist => "master-playlist",
            Self::MediaPlaylist => "media-playlist",
            Self::Other => "other",
        }
    }

    /// Best guess from the URL path alone, used for candidates that were never probed directly
    #[must_use]
    pub fn guess_from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            Self::MediaPlaylist
        } else {
            Self::Other
        }
    }
}

/// A successful probe of one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probed {
    pub latency: Duration,
    pub kind: StreamKind,
}

/// Result of probing one URL, shared through the probe memo
pub type ProbeResult = Result<Probed, VerifyError>;

/// Reachability of a host, as established by its representative URL in stage 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub representative: String,
    pub result: ProbeResult,
}

impl ProbeOutcome {
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.result.as_ref().ok().map(|p| p.latency)
    }
}

/// Verification state of one (channel, URL) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateState {
    RejectedBlacklisted,
    RejectedUnreachable,
    AcceptedFastPath,
    AcceptedFallback,
    AcceptedDeepValidated,
    RejectedInvalidContent,
    RejectedSoftError,
}

impl CandidateState {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(
            self,
            Self::AcceptedFastPath | Self::AcceptedFallback | Self::AcceptedDeepValidated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResult {
    pub url: String,
    pub state: CandidateState,
    pub latency: Option<Duration>,
    pub error: Option<VerifyError>,
}

impl CandidateResult {
    pub(crate) fn rejected(url: impl Into<String>, state: CandidateState, error: VerifyError) -> Self {
        Self {
            url: url.into(),
            state,
            latency: None,
            error: Some(error),
        }
    }

    pub(crate) fn accepted(url: impl Into<String>, state: CandidateState, latency: Duration) -> Self {
        Self {
            url: url.into(),
            state,
            latency: Some(latency),
            error: None,
        }
    }
}

/// The accepted URL of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub url: String,
    pub latency: Duration,
    pub kind: StreamKind,
    pub state: CandidateState,
}

/// Final disposition of a channel after a run.
///
/// Exactly one of `winner` and `rejection` is set once the channel is finalized;
/// neither is set only when the run was cancelled before the channel finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    /// Position of the channel in the engine input
    pub index: usize,
    pub record: ChannelRecord,
    pub group: String,
    pub candidates: Vec<CandidateResult>,
    /// Number of candidates actually tried (blacklisted and invalid ones excluded)
    pub attempts: usize,
    pub winner: Option<Winner>,
    pub rejection: Option<VerifyError>,
    pub degradations: Vec<Degradation>,
}

impl ChannelOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.winner.is_some()
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.winner.is_some() || self.rejection.is_some()
    }

    /// A deep check was skipped because its tool is unavailable
    #[must_use]
    pub fn validation_skipped(&self) -> bool {
        self.degradations
            .iter()
            .any(|d| matches!(d, Degradation::ValidatorUnavailable(_)))
    }

    /// Accepted, but at least one deep check did not run
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.is_accepted() && self.validation_skipped()
    }

    /// The most recent concrete candidate failure, if any
    #[must_use]
    pub fn last_error(&self) -> Option<&VerifyError> {
        self.candidates.iter().rev().find_map(|c| c.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_kind_from_extension() {
        assert_eq!(
            StreamKind::guess_from_url("http://a.tv/live/index.M3U8?token=1"),
            StreamKind::MediaPlaylist
        );
        assert_eq!(StreamKind::guess_from_url("http://a.tv/live/1.ts"), StreamKind::Other);
        assert_eq!(StreamKind::guess_from_url("http://a.tv/x?f=.m3u8"), StreamKind::Other);
    }

    #[test]
    fn accepted_states() {
        assert!(CandidateState::AcceptedDeepValidated.is_accepted());
        assert!(CandidateState::AcceptedFallback.is_accepted());
        assert!(!CandidateState::RejectedSoftError.is_accepted());
        assert!(!CandidateState::RejectedBlacklisted.is_accepted());
    }
}
