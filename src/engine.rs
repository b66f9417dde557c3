use std::{collections::HashSet, sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use tokio::{
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    blacklist::{AllowedCandidate, Blacklist},
    error::VerifyError,
    group::{GroupRules, default_output_order},
    host::HostKey,
    memo::Memo,
    model::{
        CandidateResult, CandidateState, ChannelOutcome, ChannelRecord, ProbeOutcome, ProbeResult,
        StreamKind, Winner,
    },
    probe::Probe,
    rank::{RankedGroup, rank},
    report::RunReport,
    validate::Validator,
};

/// Tunables of a verification run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of probes and deep checks in flight
    pub workers: usize,
    /// Maximum candidates tried per channel, the stage 1 attempt included
    pub fallback_cap: usize,
    /// Let a channel inherit its host's outcome even when its first URL is not
    /// the one that was probed
    pub trust_host_outcome: bool,
    pub output_order: Vec<String>,
    /// Draw progress bars on stderr
    pub progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 15,
            fallback_cap: 3,
            trust_host_outcome: true,
            output_order: default_output_order(),
            progress: false,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Accepted channels, grouped and ranked
    pub playlist: Vec<RankedGroup>,
    /// One outcome per input channel, in input order
    pub outcomes: Vec<ChannelOutcome>,
    /// Stage 1 outcome of every host that was probed
    pub hosts: Vec<(HostKey, ProbeOutcome)>,
    /// False when the run was cancelled before every channel was finalized
    pub complete: bool,
}

impl RunOutput {
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport::new(&self.outcomes, &self.hosts, &self.playlist, self.complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingHost,
    Fallback,
    Validate,
    Done,
}

/// A channel moving through the stages
#[derive(Debug)]
struct Work {
    outcome: ChannelOutcome,
    allowed: Vec<AllowedCandidate>,
    /// Index into `allowed` of the next candidate to try
    next: usize,
    stage: Stage,
}

impl Work {
    fn accept(&mut self, candidate: &AllowedCandidate, state: CandidateState, latency: Duration, kind: StreamKind) {
        self.outcome
            .candidates
            .push(CandidateResult::accepted(candidate.raw.as_str(), state, latency));
        self.outcome.winner = Some(Winner {
            url: candidate.raw.clone(),
            latency,
            kind,
            state,
        });
        self.stage = Stage::Validate;
    }

    fn reject(&mut self, err: VerifyError) {
        self.outcome.winner = None;
        self.outcome.rejection = Some(err);
        self.stage = Stage::Done;
    }
}

/// Per-run probe memo: one outcome per host, one result per exact URL
struct ProbeCache {
    probe: Arc<dyn Probe>,
    hosts: Memo<HostKey, ProbeOutcome>,
    urls: Memo<String, ProbeResult>,
}

impl ProbeCache {
    fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            hosts: Memo::new(),
            urls: Memo::new(),
        }
    }

    async fn probe_url(&self, url: &Url) -> ProbeResult {
        self.urls
            .get_or_init(url.to_string(), || self.probe.probe(url))
            .await
    }

    fn probed(&self, url: &Url) -> Option<ProbeResult> {
        self.urls.get(&url.to_string())
    }

    async fn probe_host(&self, host: HostKey, representative: &Url) -> ProbeOutcome {
        self.hosts
            .get_or_init(host, || async {
                ProbeOutcome {
                    representative: representative.to_string(),
                    result: self.probe_url(representative).await,
                }
            })
            .await
    }
}

/// The three-stage verification pipeline.
///
/// 1. probe one representative URL per distinct host, and accept channels whose
///    first candidate lives on a reachable host
/// 2. walk the remaining candidates of every other channel, up to the fallback cap
/// 3. run the optional deep checks on every accepted channel
///
/// Then group and rank what survived.
pub struct Engine {
    probe: Arc<dyn Probe>,
    validator: Arc<Validator>,
    blacklist: Blacklist,
    groups: GroupRules,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(
        probe: Arc<dyn Probe>,
        validator: Validator,
        blacklist: Blacklist,
        groups: GroupRules,
        config: EngineConfig,
    ) -> Self {
        Self {
            probe,
            validator: Arc::new(validator),
            blacklist,
            groups,
            config,
        }
    }

    /// Verifies `channels` and ranks the survivors.
    ///
    /// Cancelling `ct` stops new probes and checks from starting. Channels that
    /// were not finalized by then are left out of the playlist and reported as
    /// incomplete.
    pub async fn run(&self, channels: Vec<ChannelRecord>, ct: &CancellationToken) -> RunOutput {
        let cache = Arc::new(ProbeCache::new(self.probe.clone()));
        let pool = Arc::new(Semaphore::new(self.config.workers.max(1)));

        let mut work = channels
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.admit(index, record))
            .collect::<Vec<_>>();
        let blacklisted = work
            .iter()
            .filter(|w| matches!(w.outcome.rejection, Some(VerifyError::BlacklistedHost(_))))
            .count();
        info!("Verifying {} channels, {blacklisted} fully blacklisted", work.len());

        let hosts = representatives(&work);
        info!(
            "Stage 1: probing {} unique hosts with {} workers",
            hosts.len(),
            self.config.workers
        );
        self.probe_hosts(&cache, &pool, hosts, ct).await;

        for w in &mut work {
            self.apply_host_outcome(w, &cache);
        }

        let work = self.resolve_fallbacks(work, &cache, &pool, ct).await;
        let mut work = self.validate(work, &pool, ct).await;
        work.sort_by_key(|w| w.outcome.index);

        let mut complete = true;
        for w in &mut work {
            if w.stage != Stage::Done {
                complete = false;
                w.outcome.winner = None;
            }
        }
        if !complete {
            warn!("Run was cancelled, results are partial");
        }

        let outcomes = work.into_iter().map(|w| w.outcome).collect::<Vec<_>>();
        let playlist = rank(&outcomes, &self.config.output_order);
        let mut hosts = cache.hosts.snapshot();
        hosts.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            "Accepted {} of {} channels",
            outcomes.iter().filter(|o| o.is_accepted()).count(),
            outcomes.len()
        );

        RunOutput {
            playlist,
            outcomes,
            hosts,
            complete,
        }
    }

    fn admit(&self, index: usize, record: ChannelRecord) -> Work {
        let partition = self.blacklist.partition(&record);
        let fully_blacklisted = partition.fully_blacklisted();
        let group = self.groups.classify(&record.name).to_string();

        let mut work = Work {
            outcome: ChannelOutcome {
                index,
                record,
                group,
                candidates: partition.rejected,
                attempts: 0,
                winner: None,
                rejection: None,
                degradations: Vec::new(),
            },
            allowed: partition.allowed,
            next: 0,
            stage: Stage::AwaitingHost,
        };

        if fully_blacklisted {
            let err = work
                .outcome
                .candidates
                .iter()
                .find_map(|c| match &c.error {
                    Some(e @ VerifyError::BlacklistedHost(_)) => Some(e.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| VerifyError::BlacklistedHost(String::new()));
            debug!("{} is fully blacklisted", work.outcome.record.name);
            work.reject(err);
        } else if work.allowed.is_empty() {
            work.reject(VerifyError::FallbackExhausted { attempts: 0 });
        }

        work
    }

    async fn probe_hosts(
        &self,
        cache: &Arc<ProbeCache>,
        pool: &Arc<Semaphore>,
        hosts: Vec<(HostKey, Url)>,
        ct: &CancellationToken,
    ) {
        let bar = self.progress_bar(hosts.len(), "Probing hosts");
        let mut tasks = JoinSet::new();

        // Permits are taken here, so probes start in first-occurrence order
        for (host, url) in hosts {
            let Some(permit) = acquire(pool, ct).await else {
                warn!("Cancelled, skipping remaining host probes");
                break;
            };
            let cache = cache.clone();
            let bar = bar.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = cache.probe_host(host.clone(), &url).await;
                match &outcome.result {
                    Ok(probed) => debug!("{host} reachable in {}ms", probed.latency.as_millis()),
                    Err(e) => debug!("{host} unreachable: {e}"),
                }
                bar.inc(1);
            });
        }

        tasks.join_all().await;
        bar.finish_and_clear();
    }

    fn apply_host_outcome(&self, work: &mut Work, cache: &ProbeCache) {
        if work.stage != Stage::AwaitingHost {
            return;
        }
        let Some(first) = work.allowed.first().cloned() else {
            return;
        };
        // Host was never probed: the run got cancelled
        let Some(host) = cache.hosts.get(&first.host) else {
            return;
        };

        let representative = host.representative == first.url.as_str();
        if !representative && !self.config.trust_host_outcome {
            work.stage = Stage::Fallback;
            return;
        }

        work.next = 1;
        work.outcome.attempts = 1;
        match host.result {
            Ok(probed) => {
                let kind = if representative {
                    probed.kind
                } else {
                    StreamKind::guess_from_url(first.url.as_str())
                };
                work.accept(&first, CandidateState::AcceptedFastPath, probed.latency, kind);
            }
            Err(err) => {
                work.outcome.candidates.push(CandidateResult::rejected(
                    first.raw.as_str(),
                    CandidateState::RejectedUnreachable,
                    err,
                ));
                work.stage = Stage::Fallback;
            }
        }
    }

    async fn resolve_fallbacks(
        &self,
        work: Vec<Work>,
        cache: &Arc<ProbeCache>,
        pool: &Arc<Semaphore>,
        ct: &CancellationToken,
    ) -> Vec<Work> {
        let (pending, mut settled): (Vec<_>, Vec<_>) =
            work.into_iter().partition(|w| w.stage == Stage::Fallback);
        if pending.is_empty() {
            return settled;
        }

        info!("Stage 2: trying fallback URLs for {} channels", pending.len());
        let bar = self.progress_bar(pending.len(), "Fallbacks");
        let cap = self.config.fallback_cap.max(1);
        let mut tasks = JoinSet::new();

        for w in pending {
            let cache = cache.clone();
            let pool = pool.clone();
            let ct = ct.clone();
            let bar = bar.clone();
            tasks.spawn(async move {
                let w = resolve_fallback(w, &cache, &pool, &ct, cap).await;
                bar.inc(1);
                w
            });
        }

        settled.extend(tasks.join_all().await);
        bar.finish_and_clear();
        settled
    }

    async fn validate(&self, work: Vec<Work>, pool: &Arc<Semaphore>, ct: &CancellationToken) -> Vec<Work> {
        let (pending, mut settled): (Vec<_>, Vec<_>) =
            work.into_iter().partition(|w| w.stage == Stage::Validate);
        if pending.is_empty() {
            return settled;
        }

        info!("Stage 3: validating {} accepted channels", pending.len());
        let bar = self.progress_bar(pending.len(), "Validating");
        let mut tasks = JoinSet::new();

        for w in pending {
            let validator = self.validator.clone();
            let pool = pool.clone();
            let ct = ct.clone();
            let bar = bar.clone();
            tasks.spawn(async move {
                let w = validate_one(w, &validator, &pool, &ct).await;
                bar.inc(1);
                w
            });
        }

        settled.extend(tasks.join_all().await);
        bar.finish_and_clear();
        settled
    }

    fn progress_bar(&self, len: usize, message: &'static str) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {msg:>14} [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style);
        }
        bar.set_message(message);
        bar
    }
}

/// Distinct hosts with their representative URL, in first-occurrence order
fn representatives(work: &[Work]) -> Vec<(HostKey, Url)> {
    let mut seen = HashSet::new();
    work.iter()
        .flat_map(|w| &w.allowed)
        .filter(|c| seen.insert(c.host.clone()))
        .map(|c| (c.host.clone(), c.url.clone()))
        .collect()
}

/// Waits for a worker slot, giving up as soon as the run is cancelled
async fn acquire(pool: &Arc<Semaphore>, ct: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    if ct.is_cancelled() {
        return None;
    }
    select! {
        biased;
        () = ct.cancelled() => None,
        permit = pool.clone().acquire_owned() => permit.ok(),
    }
}

async fn resolve_fallback(
    mut work: Work,
    cache: &ProbeCache,
    pool: &Arc<Semaphore>,
    ct: &CancellationToken,
    cap: usize,
) -> Work {
    while work.outcome.attempts < cap {
        let Some(candidate) = work.allowed.get(work.next).cloned() else {
            break;
        };

        let result = match cache.probed(&candidate.url) {
            Some(result) => result,
            None => {
                let Some(_permit) = acquire(pool, ct).await else {
                    return work;
                };
                cache.probe_url(&candidate.url).await
            }
        };
        work.next += 1;
        work.outcome.attempts += 1;

        match result {
            Ok(probed) => {
                debug!(
                    "{} fell back to {} ({}ms)",
                    work.outcome.record.name,
                    candidate.raw,
                    probed.latency.as_millis()
                );
                work.accept(&candidate, CandidateState::AcceptedFallback, probed.latency, probed.kind);
                return work;
            }
            Err(err) => {
                debug!("{} candidate {} failed: {err}", work.outcome.record.name, candidate.raw);
                work.outcome.candidates.push(CandidateResult::rejected(
                    candidate.raw.as_str(),
                    CandidateState::RejectedUnreachable,
                    err,
                ));
            }
        }
    }

    let attempts = work.outcome.attempts;
    work.reject(VerifyError::FallbackExhausted { attempts });
    work
}

async fn validate_one(mut work: Work, validator: &Validator, pool: &Arc<Semaphore>, ct: &CancellationToken) -> Work {
    let Some(winner) = work.outcome.winner.clone() else {
        work.stage = Stage::Done;
        return work;
    };

    // Nothing to spawn means nothing to gate, not even on cancellation
    let _permit = if validator.has_checks_for(winner.kind) {
        match acquire(pool, ct).await {
            Some(permit) => Some(permit),
            None => return work,
        }
    } else {
        None
    };

    let validation = validator.validate(&winner.url, winner.kind, winner.state).await;
    work.outcome.degradations.extend(validation.degradations);

    if let Some(candidate) = work.outcome.candidates.last_mut() {
        candidate.state = validation.state;
        candidate.error.clone_from(&validation.rejection);
    }

    match validation.rejection {
        Some(err) => {
            debug!("{} rejected in validation: {err}", work.outcome.record.name);
            work.reject(err);
        }
        None => {
            work.outcome.winner = Some(Winner {
                state: validation.state,
                ..winner
            });
            work.stage = Stage::Done;
        }
    }
    work
}
