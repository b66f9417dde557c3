use std::time::Duration;

use serde::Serialize;

use crate::model::{CandidateState, ChannelOutcome};

/// One channel in the final playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedChannel {
    pub name: String,
    pub url: String,
    #[serde(rename = "latency_ms", serialize_with = "crate::util::as_millis")]
    pub latency: Duration,
    pub group: String,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
    pub state: CandidateState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedGroup {
    pub label: String,
    pub channels: Vec<RankedChannel>,
}

/// Groups accepted channels and orders them for output.
///
/// Groups follow `output_order`; groups it does not name come after, in order of
/// first appearance. Inside a group channels are sorted by latency, and channels
/// with equal latency keep their input order.
#[must_use]
pub fn rank(outcomes: &[ChannelOutcome], output_order: &[String]) -> Vec<RankedGroup> {
    let mut accepted = outcomes
        .iter()
        .filter(|o| o.is_accepted())
        .collect::<Vec<_>>();
    accepted.sort_by_key(|o| o.index);

    let mut groups: Vec<RankedGroup> = Vec::new();
    for outcome in accepted {
        let Some(winner) = &outcome.winner else {
            continue;
        };
        let channel = RankedChannel {
            name: outcome.record.name.clone(),
            url: winner.url.clone(),
            latency: winner.latency,
            group: outcome.group.clone(),
            logo: outcome.record.logo.clone(),
            tvg_id: outcome.record.tvg_id.clone(),
            state: winner.state,
        };

        match groups.iter_mut().find(|g| g.label == outcome.group) {
            Some(group) => group.channels.push(channel),
            None => groups.push(RankedGroup {
                label: outcome.group.clone(),
                channels: vec![channel],
            }),
        }
    }

    // `sort_by_key` is stable, which preserves input order between equal latencies
    for group in &mut groups {
        group.channels.sort_by_key(|c| c.latency);
    }

    let mut ordered = Vec::with_capacity(groups.len());
    for label in output_order {
        if let Some(pos) = groups.iter().position(|g| &g.label == label) {
            ordered.push(groups.remove(pos));
        }
    }
    ordered.extend(groups);
    ordered
}
