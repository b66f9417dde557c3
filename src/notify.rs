use std::{fmt::Write as _, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use chrono::{DateTime, FixedOffset};
use reqwest::Url;
use tracing::{info, instrument, warn};

use crate::report::RunStats;

pub const BARK_API: &str = "https://api.day.app/";
const TOP_GROUPS: usize = 8;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of the push notification summarizing a run
#[must_use]
pub fn summary(stats: &RunStats, generated_at: DateTime<FixedOffset>) -> String {
    let mut body = indoc::formatdoc! {"
        {time}
        Channels: {channels}
        Unique hosts: {hosts}
        Reachable hosts: {alive} ({rate:.1}%)
        Accepted channels: {accepted}

        Groups:
        ",
        time = generated_at.format("%Y-%m-%d %H:%M:%S"),
        channels = stats.channels,
        hosts = stats.unique_hosts,
        alive = stats.alive_hosts,
        rate = stats.survival_rate,
        accepted = stats.accepted + stats.degraded,
    };

    let mut groups = stats.groups.iter().collect::<Vec<_>>();
    groups.sort_by(|a, b| b.1.cmp(a.1));
    for (label, count) in groups.iter().take(TOP_GROUPS) {
        let _ = writeln!(body, "- {label}: {count}");
    }
    if groups.len() > TOP_GROUPS {
        let _ = writeln!(body, "- ... ({} groups in total)", groups.len());
    }
    body.trim_end().to_string()
}

/// Push URL for a Bark device: `<api>/<key>/<title>/<body>`, each segment escaped
///
/// # Errors
/// When `api` is not a base URL
pub fn bark_url(api: &str, device_key: &str, title: &str, body: &str) -> Result<Url> {
    let mut url = Url::parse(api).with_context(|| format!("Parsing Bark API URL {api:?}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("Bark API URL {api:?} cannot be a base"))?
        .pop_if_empty()
        .extend([device_key, title, body]);
    url.query_pairs_mut()
        .append_pair("group", "iptv")
        .append_pair("level", "active");
    Ok(url)
}

/// Sends a Bark push notification.
///
/// # Errors
/// When the request fails or Bark answers with a non-success status
#[instrument(skip_all)]
pub async fn send_bark(client: &reqwest::Client, api: &str, device_key: &str, title: &str, body: &str) -> Result<()> {
    let url = bark_url(api, device_key, title, body)?;
    let res = client
        .get(url)
        .timeout(NOTIFY_TIMEOUT)
        .send()
        .await
        .context("Sending Bark notification")?;
    ensure!(res.status().is_success(), "Bark answered with HTTP {}", res.status());
    info!("Bark notification sent");
    Ok(())
}

/// Sends the run summary when a device key is configured. Failures are logged only.
pub async fn notify_run(client: &reqwest::Client, device_key: Option<&str>, stats: &RunStats, generated_at: DateTime<FixedOffset>) {
    let Some(key) = device_key.map(str::trim).filter(|k| !k.is_empty()) else {
        info!("No Bark device key configured, skipping notification");
        return;
    };

    let body = summary(stats, generated_at);
    if let Err(e) = send_bark(client, BARK_API, key, "IPTV verification finished", &body).await {
        warn!("Failed to send Bark notification: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;

    fn stats(groups: usize) -> RunStats {
        RunStats {
            channels: 40,
            unique_hosts: 10,
            alive_hosts: 7,
            survival_rate: 70.0,
            accepted: 20,
            degraded: 2,
            groups: (0..groups).map(|i| (format!("group{i:02}"), i + 1)).collect::<BTreeMap<_, _>>(),
            ..RunStats::default()
        }
    }

    #[test]
    fn summary_keeps_top_groups() {
        let body = summary(&stats(10), crate::util::beijing_now());
        assert!(body.contains("Reachable hosts: 7 (70.0%)"));
        assert!(body.contains("Accepted channels: 22"));
        assert!(body.contains("- group09: 10"));
        assert!(!body.contains("- group01: 2"));
        assert!(body.ends_with("- ... (10 groups in total)"));
    }

    #[test]
    fn escapes_path_segments() {
        let url = bark_url(BARK_API, "abc123", "IPTV done", "a/b\n50%").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.day.app/abc123/IPTV%20done/a%2Fb%0A50%25?group=iptv&level=active"
        );
    }

    #[tokio::test]
    async fn sends_to_bark() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devicekey/title/body"))
            .and(query_param("group", "iptv"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        send_bark(&client, &server.uri(), "devicekey", "title", "body").await.unwrap();

        assert!(
            send_bark(&client, "http://127.0.0.1:9/", "k", "t", "b")
                .await
                .is_err()
        );
    }
}
