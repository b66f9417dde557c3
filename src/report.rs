use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;

use crate::{
    host::HostKey,
    model::{CandidateState, ChannelOutcome, ProbeOutcome, StreamKind},
    rank::RankedGroup,
};

/// Coarse disposition of a channel, for humans reading the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Accepted,
    /// Accepted, but at least one deep check was skipped
    Degraded,
    Rejected,
    /// The run was cancelled before the channel was verified
    Incomplete,
}

/// Per-channel line of the outcome report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub name: String,
    pub group: String,
    pub disposition: Disposition,
    pub state: Option<CandidateState>,
    /// Accepted without every deep check, see `notes`
    pub validation_skipped: bool,
    pub url: Option<String>,
    #[serde(rename = "latency_ms", serialize_with = "crate::util::opt_millis")]
    pub latency: Option<Duration>,
    /// Machine label of the rejection, e.g. `no-valid-stream`
    pub reason_code: Option<&'static str>,
    pub reason: Option<String>,
    /// The concrete failure of the last candidate tried
    pub last_error: Option<String>,
    pub attempts: usize,
    pub candidates: usize,
    pub notes: Vec<String>,
}

impl From<&ChannelOutcome> for OutcomeRecord {
    fn from(outcome: &ChannelOutcome) -> Self {
        let disposition = if outcome.is_degraded() {
            Disposition::Degraded
        } else if outcome.is_accepted() {
            Disposition::Accepted
        } else if outcome.rejection.is_some() {
            Disposition::Rejected
        } else {
            Disposition::Incomplete
        };

        let (reason_code, reason) = match (&outcome.rejection, disposition) {
            (Some(err), _) => (Some(err.code()), Some(err.to_string())),
            (None, Disposition::Incomplete) => {
                let err = crate::error::VerifyError::Cancelled;
                (Some(err.code()), Some(err.to_string()))
            }
            (None, _) => (None, None),
        };

        Self {
            name: outcome.record.name.clone(),
            group: outcome.group.clone(),
            disposition,
            state: outcome.winner.as_ref().map(|w| w.state),
            validation_skipped: outcome.is_degraded(),
            url: outcome.winner.as_ref().map(|w| w.url.clone()),
            latency: outcome.winner.as_ref().map(|w| w.latency),
            reason_code,
            reason,
            last_error: if outcome.is_accepted() {
                None
            } else {
                outcome.last_error().map(ToString::to_string)
            },
            attempts: outcome.attempts,
            candidates: outcome.record.urls.len(),
            notes: outcome.degradations.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Stage 1 result of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub host: String,
    pub representative: String,
    pub reachable: bool,
    #[serde(rename = "latency_ms", serialize_with = "crate::util::opt_millis")]
    pub latency: Option<Duration>,
    pub kind: Option<StreamKind>,
    pub error: Option<String>,
}

impl HostRecord {
    #[must_use]
    pub fn new(host: &HostKey, outcome: &ProbeOutcome) -> Self {
        Self {
            host: host.to_string(),
            representative: outcome.representative.clone(),
            reachable: outcome.is_reachable(),
            latency: outcome.latency(),
            kind: outcome.result.as_ref().ok().map(|p| p.kind),
            error: outcome.result.as_ref().err().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub channels: usize,
    pub unique_hosts: usize,
    pub alive_hosts: usize,
    /// Percentage of probed hosts that answered
    pub survival_rate: f64,
    pub accepted: usize,
    pub degraded: usize,
    pub rejected: usize,
    pub incomplete: usize,
    /// Accepted channels per group label
    pub groups: BTreeMap<String, usize>,
}

/// Everything a report writer needs about a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// False when the run was cancelled and some channels were never verified
    pub complete: bool,
    pub stats: RunStats,
    pub outcomes: Vec<OutcomeRecord>,
    /// Hosts sorted by ascending latency, unreachable ones last
    pub hosts: Vec<HostRecord>,
}

impl RunReport {
    #[must_use]
    pub fn new(
        outcomes: &[ChannelOutcome],
        hosts: &[(HostKey, ProbeOutcome)],
        playlist: &[RankedGroup],
        complete: bool,
    ) -> Self {
        let outcomes = outcomes.iter().map(OutcomeRecord::from).collect::<Vec<_>>();

        let mut hosts = hosts
            .iter()
            .map(|(key, outcome)| HostRecord::new(key, outcome))
            .collect::<Vec<_>>();
        hosts.sort_by(|a, b| {
            (!a.reachable, a.latency, &a.host).cmp(&(!b.reachable, b.latency, &b.host))
        });

        let count = |d: Disposition| outcomes.iter().filter(|o| o.disposition == d).count();
        let alive_hosts = hosts.iter().filter(|h| h.reachable).count();
        #[allow(clippy::cast_precision_loss)]
        let survival_rate = if hosts.is_empty() {
            0.0
        } else {
            alive_hosts as f64 / hosts.len() as f64 * 100.0
        };

        let stats = RunStats {
            channels: outcomes.len(),
            unique_hosts: hosts.len(),
            alive_hosts,
            survival_rate,
            accepted: count(Disposition::Accepted),
            degraded: count(Disposition::Degraded),
            rejected: count(Disposition::Rejected),
            incomplete: count(Disposition::Incomplete),
            groups: playlist
                .iter()
                .map(|g| (g.label.clone(), g.channels.len()))
                .collect(),
        };

        Self {
            complete,
            stats,
            outcomes,
            hosts,
        }
    }

    /// Channels that did not make it into the playlist, or made it without full validation
    pub fn problems(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.outcomes
            .iter()
            .filter(|o| o.disposition != Disposition::Accepted)
    }
}
