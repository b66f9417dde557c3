use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::{debug, info};

use crate::{
    error::VerifyError,
    host::{HostKey, parse_stream_url},
    model::{CandidateResult, CandidateState, ChannelRecord},
};

/// Denylisted `host:port` keys. Matching is exact: no wildcards, no subdomains.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    hosts: HashSet<String>,
}

/// A candidate that survived the blacklist, with its priority position
#[derive(Debug, Clone)]
pub struct AllowedCandidate {
    pub position: usize,
    pub url: Url,
    pub raw: String,
    pub host: HostKey,
}

/// Candidates of one channel split by the blacklist
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub allowed: Vec<AllowedCandidate>,
    /// Blacklisted and unparseable candidates, in input order
    pub rejected: Vec<CandidateResult>,
    pub blacklisted: usize,
}

impl Partition {
    /// Every candidate was blacklisted (and there was at least one)
    #[must_use]
    pub const fn fully_blacklisted(&self) -> bool {
        self.allowed.is_empty() && self.blacklisted > 0
    }
}

impl Blacklist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: entries
                .into_iter()
                .filter_map(|e| normalize_entry(e.as_ref()))
                .collect(),
        }
    }

    /// Parses a blacklist file body: one `host` or `host:port` per line, `#` comments
    #[must_use]
    pub fn parse(body: &str) -> Self {
        Self::new(body.lines())
    }

    /// Loads the blacklist file. A missing file is an empty blacklist.
    ///
    /// # Errors
    /// When the file exists but cannot be read
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!("Blacklist {path:?} does not exist, host filtering disabled");
            return Ok(Self::default());
        }

        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Reading blacklist {path:?}"))?;
        let blacklist = Self::parse(&body);
        info!("Loaded {} blacklisted host(s) from {path:?}", blacklist.len());
        Ok(blacklist)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    #[must_use]
    pub fn contains(&self, host: &HostKey) -> bool {
        self.hosts.contains(&host.authority())
    }

    /// Splits a channel's candidates into allowed and rejected ones without touching the network
    #[must_use]
    pub fn partition(&self, record: &ChannelRecord) -> Partition {
        let mut partition = Partition::default();

        for (position, raw) in record.urls.iter().enumerate() {
            match parse_stream_url(raw) {
                Ok((_, host)) if self.contains(&host) => {
                    debug!("Blacklisted candidate for {}: {raw}", record.name);
                    partition.blacklisted += 1;
                    partition.rejected.push(CandidateResult::rejected(
                        raw.as_str(),
                        CandidateState::RejectedBlacklisted,
                        VerifyError::BlacklistedHost(host.authority()),
                    ));
                }
                Ok((url, host)) => partition.allowed.push(AllowedCandidate {
                    position,
                    url,
                    raw: raw.clone(),
                    host,
                }),
                Err(e) => partition.rejected.push(CandidateResult::rejected(
                    raw.as_str(),
                    CandidateState::RejectedUnreachable,
                    e,
                )),
            }
        }

        partition
    }
}

fn normalize_entry(line: &str) -> Option<String> {
    let entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    let entry = entry.to_ascii_lowercase();
    if entry.contains(':') {
        Some(entry)
    } else {
        Some(format!("{entry}:80"))
    }
}
