use std::{fmt::Write as _, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use tracing::info;

use crate::{
    model::StreamKind,
    rank::RankedGroup,
    report::{Disposition, RunReport},
    sources::{SourceDetail, SourceKind},
    util::{millis, truncate_string},
};

/// What the M3U writer needs besides the channels
#[derive(Debug, Clone)]
pub struct M3uOptions<'a> {
    pub epg_url: &'a str,
    /// Fallback logo location, joined with the channel name
    pub logo_base_url: &'a str,
}

/// Logo of a channel: its own when the source had one, else `<base><name>.png`
#[must_use]
pub fn logo_url(name: &str, logo: Option<&str>, base: &str) -> String {
    if let Some(logo) = logo.filter(|l| !l.is_empty()) {
        return logo.to_string();
    }
    let slug = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase();
    format!("{base}{slug}.png")
}

#[must_use]
pub fn render_m3u(playlist: &[RankedGroup], options: &M3uOptions<'_>) -> String {
    let mut out = format!("#EXTM3U x-tvg-url=\"{}\"\n", options.epg_url);
    for group in playlist {
        for channel in &group.channels {
            let tvg_id = channel.tvg_id.as_deref().unwrap_or(&channel.name);
            let logo = logo_url(&channel.name, channel.logo.as_deref(), options.logo_base_url);
            let _ = writeln!(
                out,
                "#EXTINF:-1 tvg-id=\"{tvg_id}\" tvg-name=\"{name}\" tvg-logo=\"{logo}\" group-title=\"{group}\",{name}\n{url}",
                name = channel.name,
                group = group.label,
                url = channel.url,
            );
        }
    }
    out
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Human-readable run report
#[must_use]
pub fn render_markdown(report: &RunReport, sources: &[SourceDetail], generated_at: DateTime<FixedOffset>) -> String {
    let stats = &report.stats;
    let mut out = indoc::formatdoc! {"
        # IPTV verification report
        **Generated**: {generated}
        **Host survival rate**: {rate:.1}%

        ## Summary
        | Item | Count |
        |------|-------|
        | Channels | {channels} |
        | Unique hosts | {hosts} |
        | Reachable hosts | {alive} |
        | Accepted | {accepted} |
        | Accepted, validation skipped | {degraded} |
        | Rejected | {rejected} |
        | Not verified (cancelled) | {incomplete} |
        ",
        generated = generated_at.format("%Y-%m-%d %H:%M:%S"),
        rate = stats.survival_rate,
        channels = stats.channels,
        hosts = stats.unique_hosts,
        alive = stats.alive_hosts,
        accepted = stats.accepted,
        degraded = stats.degraded,
        rejected = stats.rejected,
        incomplete = stats.incomplete,
    };
    if !report.complete {
        out.push_str("\n> The run was cancelled. Results are partial.\n");
    }

    out.push_str("\n## Sources\n| Type | Location | Status | Entries | Error |\n|------|----------|--------|---------|-------|\n");
    for source in sources {
        let kind = match source.kind {
            SourceKind::Remote => "remote",
            SourceKind::Local => "local",
        };
        let location = match source.kind {
            SourceKind::Remote => source.location.as_str(),
            SourceKind::Local => Path::new(&source.location)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&source.location),
        };
        let _ = writeln!(
            out,
            "| {kind} | `{}` | {} | {} | {} |",
            cell(location),
            if source.success { "ok" } else { "failed" },
            source.entries,
            cell(source.error.as_deref().unwrap_or("-")),
        );
    }

    out.push_str("\n## Groups\n");
    let mut groups = stats.groups.iter().collect::<Vec<_>>();
    groups.sort_by(|a, b| b.1.cmp(a.1));
    for (label, count) in groups {
        let _ = writeln!(out, "- **{label}**: {count}");
    }

    out.push_str("\n## Accepted channels\n");
    let mut accepted = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.disposition, Disposition::Accepted | Disposition::Degraded))
        .collect::<Vec<_>>();
    accepted.sort_by(|a, b| a.name.cmp(&b.name));
    if accepted.is_empty() {
        out.push_str("- none\n");
    }
    for outcome in accepted {
        let latency = outcome.latency.map_or(0, millis);
        let _ = writeln!(out, "- {} ({latency}ms)", outcome.name);
    }

    out.push_str("\n## Rejected and degraded channels\n");
    let problems = report.problems().collect::<Vec<_>>();
    if problems.is_empty() {
        out.push_str("- none\n");
    } else {
        out.push_str("| Channel | Status | Reason | Last error | Attempts | Notes |\n|---------|--------|--------|------------|----------|-------|\n");
        for outcome in problems {
            let status = match outcome.disposition {
                Disposition::Accepted => "accepted",
                Disposition::Degraded => "degraded",
                Disposition::Rejected => "rejected",
                Disposition::Incomplete => "incomplete",
            };
            let _ = writeln!(
                out,
                "| {} | {status} | {} | {} | {}/{} | {} |",
                cell(&outcome.name),
                cell(outcome.reason.as_deref().unwrap_or("-")),
                cell(&outcome.last_error.as_deref().map_or_else(|| "-".to_string(), |e| truncate_string(&e, 120))),
                outcome.attempts,
                outcome.candidates,
                cell(&outcome.notes.join("; ")),
            );
        }
    }

    out.push_str("\n## Host latency ranking\n| Host | Latency (ms) | Kind | Probed URL |\n|------|--------------|------|------------|\n");
    for host in report.hosts.iter().filter(|h| h.reachable) {
        let kind = host.kind.map_or("-", StreamKind::label);
        let _ = writeln!(
            out,
            "| `{}` | **{}** | `{kind}` | `{}` |",
            cell(&host.host),
            host.latency.map_or(0, millis),
            cell(&host.representative),
        );
    }

    out
}

async fn write_file(path: &Path, body: &str, what: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Creating directory {parent:?}"))?;
    }
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Writing {what} to {path:?}"))?;
    info!("Wrote {what} to {path:?} ({} bytes)", body.len());
    Ok(())
}

/// # Errors
/// When the file or its parent directory cannot be written
pub async fn write_m3u(path: &Path, playlist: &[RankedGroup], options: &M3uOptions<'_>) -> Result<()> {
    write_file(path, &render_m3u(playlist, options), "playlist").await
}

/// # Errors
/// When the file or its parent directory cannot be written
pub async fn write_markdown(
    path: &Path,
    report: &RunReport,
    sources: &[SourceDetail],
    generated_at: DateTime<FixedOffset>,
) -> Result<()> {
    write_file(path, &render_markdown(report, sources, generated_at), "report").await
}

/// # Errors
/// When serialization fails or the file cannot be written
pub async fn write_json(path: &Path, report: &RunReport) -> Result<()> {
    let body = serde_json::to_string_pretty(report).context("Serializing run report")?;
    write_file(path, &body, "JSON report").await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{model::CandidateState, rank::RankedChannel};

    fn playlist() -> Vec<RankedGroup> {
        vec![RankedGroup {
            label: "央视频道".to_string(),
            channels: vec![
                RankedChannel {
                    name: "CCTV1".to_string(),
                    url: "http://live1.example/b.m3u8".to_string(),
                    latency: Duration::from_millis(120),
                    group: "央视频道".to_string(),
                    logo: None,
                    tvg_id: None,
                    state: CandidateState::AcceptedFastPath,
                },
                RankedChannel {
                    name: "CGTN Documentary".to_string(),
                    url: "http://c.tv/doc.m3u8".to_string(),
                    latency: Duration::from_millis(300),
                    group: "央视频道".to_string(),
                    logo: Some("http://logo/doc.png".to_string()),
                    tvg_id: Some("CGTNDOC".to_string()),
                    state: CandidateState::AcceptedFallback,
                },
            ],
        }]
    }

    #[test]
    fn renders_m3u() {
        let options = M3uOptions {
            epg_url: "http://epg/e.xml",
            logo_base_url: "http://logos/",
        };
        assert_eq!(
            render_m3u(&playlist(), &options),
            indoc::indoc! {r#"
                #EXTM3U x-tvg-url="http://epg/e.xml"
                #EXTINF:-1 tvg-id="CCTV1" tvg-name="CCTV1" tvg-logo="http://logos/cctv1.png" group-title="央视频道",CCTV1
                http://live1.example/b.m3u8
                #EXTINF:-1 tvg-id="CGTNDOC" tvg-name="CGTN Documentary" tvg-logo="http://logo/doc.png" group-title="央视频道",CGTN Documentary
                http://c.tv/doc.m3u8
            "#}
        );
    }

    #[test]
    fn logo_slug() {
        assert_eq!(logo_url("CCTV5+", None, "b/"), "b/cctv5.png");
        assert_eq!(logo_url("湖南 卫视", Some(""), "b/"), "b/湖南卫视.png");
    }

    #[test]
    fn markdown_lists_problems() {
        let mut outcome = crate::model::ChannelOutcome {
            index: 0,
            record: crate::model::ChannelRecord::new("XYZ|TV", ["http://a.tv/x.ts"]),
            group: "国际频道".to_string(),
            candidates: Vec::new(),
            attempts: 1,
            winner: None,
            rejection: Some(crate::error::VerifyError::FallbackExhausted { attempts: 1 }),
            degradations: Vec::new(),
        };
        outcome.candidates.push(crate::model::CandidateResult::rejected(
            "http://a.tv/x.ts",
            CandidateState::RejectedUnreachable,
            crate::error::VerifyError::HttpStatus(404),
        ));
        let report = RunReport::new(&[outcome], &[], &[], true);
        let sources = [SourceDetail {
            kind: SourceKind::Local,
            location: "/srv/lists/a.m3u".to_string(),
            success: true,
            error: None,
            entries: 1,
        }];

        let md = render_markdown(&report, &sources, crate::util::beijing_now());
        assert!(md.contains("| local | `a.m3u` | ok | 1 | - |"));
        assert!(md.contains("| XYZ\\|TV | rejected | no valid stream after 1 attempt(s) | unexpected HTTP status 404 | 1/1 |  |"));
        assert!(!md.contains("Results are partial"));
    }
}
