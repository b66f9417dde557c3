use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use futures_util::{StreamExt, stream};
use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};

use crate::playlist::{Entry, parse_playlist};

const MAX_CONCURRENT_FETCHES: usize = 10;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Remote,
    Local,
}

/// How loading one source went, for the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDetail {
    pub kind: SourceKind,
    /// URL of a remote source, path of a local one
    pub location: String,
    pub success: bool,
    pub error: Option<String>,
    /// Number of channel entries parsed from the source
    pub entries: usize,
}

impl SourceDetail {
    fn loaded(kind: SourceKind, location: String, entries: usize) -> Self {
        Self {
            kind,
            location,
            success: true,
            error: None,
            entries,
        }
    }

    fn failed(kind: SourceKind, location: String, error: impl ToString) -> Self {
        Self {
            kind,
            location,
            success: false,
            error: Some(error.to_string()),
            entries: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedSources {
    /// Entries of every source, remote ones first, each in source order
    pub entries: Vec<Entry>,
    pub details: Vec<SourceDetail>,
}

/// Parses the remote source list: one http(s) URL per line, `#` comments
#[must_use]
pub fn parse_source_list(body: &str) -> Vec<Url> {
    body.lines()
        .enumerate()
        .filter_map(|(line_no, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match Url::parse(line) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                _ => {
                    warn!("Ignoring invalid source URL on line {}: {line}", line_no + 1);
                    None
                }
            }
        })
        .collect()
}

/// Loads every remote source in `list` and every playlist file in `local_dir`.
///
/// A failing source is recorded in its [`SourceDetail`] and skipped.
///
/// # Errors
/// When the source list cannot be read, or when no source yielded a single entry
pub async fn load_sources(
    client: &reqwest::Client,
    list: Option<&Path>,
    local_dir: Option<&Path>,
) -> Result<LoadedSources> {
    let mut loaded = LoadedSources::default();

    if let Some(list) = list {
        let body = tokio::fs::read_to_string(list)
            .await
            .with_context(|| format!("Reading source list {list:?}"))?;
        let urls = parse_source_list(&body);
        info!("Fetching {} remote sources", urls.len());

        // `buffered` keeps results in list order
        let results = stream::iter(urls)
            .map(|url| fetch_remote(client, url))
            .buffered(MAX_CONCURRENT_FETCHES)
            .collect::<Vec<_>>()
            .await;
        for (entries, detail) in results {
            loaded.entries.extend(entries);
            loaded.details.push(detail);
        }
    }

    if let Some(dir) = local_dir {
        for path in local_playlists(dir).await? {
            let location = path.display().to_string();
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => {
                    let entries = parse_playlist(&body);
                    info!("Loaded {} entries from {location}", entries.len());
                    loaded
                        .details
                        .push(SourceDetail::loaded(SourceKind::Local, location, entries.len()));
                    loaded.entries.extend(entries);
                }
                Err(e) => {
                    warn!("Failed to read {location}: {e}");
                    loaded
                        .details
                        .push(SourceDetail::failed(SourceKind::Local, location, e));
                }
            }
        }
    }

    if loaded.entries.is_empty() {
        bail!("Every source was empty or failed to load");
    }
    Ok(loaded)
}

async fn fetch_remote(client: &reqwest::Client, url: Url) -> (Vec<Entry>, SourceDetail) {
    let location = url.to_string();
    let body = async {
        let res = client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        res.text().await
    }
    .await;

    match body {
        Ok(body) => {
            let entries = parse_playlist(&body);
            if entries.is_empty() {
                warn!("{location} has no usable entries");
                return (Vec::new(), SourceDetail::failed(SourceKind::Remote, location, "empty or unparseable"));
            }
            info!("Fetched {} entries from {location}", entries.len());
            let detail = SourceDetail::loaded(SourceKind::Remote, location, entries.len());
            (entries, detail)
        }
        Err(e) => {
            warn!("Failed to fetch {location}: {e}");
            let error = e.status().map_or_else(|| e.to_string(), |s| format!("HTTP {}", s.as_u16()));
            (Vec::new(), SourceDetail::failed(SourceKind::Remote, location, error))
        }
    }
}

/// `.m3u` and `.txt` files of `dir`, sorted by name. A missing directory has none.
async fn local_playlists(dir: &Path) -> Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        info!("Local playlist directory {dir:?} does not exist, skipping");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Listing {dir:?}"))?;
    while let Some(item) = read_dir.next_entry().await? {
        let path = item.path();
        let is_playlist = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("m3u") || e.eq_ignore_ascii_case("txt"));
        if is_playlist && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    #[test]
    fn source_list_skips_comments_and_junk() {
        let urls = parse_source_list("# remote lists\nhttps://a.example/live.m3u\n\nftp://nope\nnot a url\nhttp://b.example/tv.txt\n");
        assert_eq!(
            urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://a.example/live.m3u", "http://b.example/tv.txt"]
        );
    }

    #[tokio::test]
    async fn loads_remote_and_local_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/one.m3u"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXTINF:-1,CCTV1\nhttp://a.tv/1.m3u8\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/two.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("体育,#genre#\nCCTV5,http://b.tv/5.m3u8\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.m3u"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("sources.txt");
        tokio::fs::write(
            &list,
            format!("{0}/one.m3u\n{0}/gone.m3u\n{0}/two.txt\n", server.uri()),
        )
        .await
        .unwrap();
        let local = dir.path().join("local");
        tokio::fs::create_dir(&local).await.unwrap();
        tokio::fs::write(local.join("b.txt"), "湖南卫视,http://c.tv/hn.m3u8\n").await.unwrap();
        tokio::fs::write(local.join("a.m3u"), "#EXTM3U\n#EXTINF:-1,CGTN\nhttp://d.tv/cgtn.m3u8\n").await.unwrap();
        tokio::fs::write(local.join("notes.md"), "ignored").await.unwrap();

        let client = reqwest::Client::new();
        let loaded = load_sources(&client, Some(&list), Some(&local)).await.unwrap();

        assert_eq!(
            loaded.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["CCTV1", "CCTV5", "CGTN", "湖南卫视"]
        );
        assert_eq!(loaded.details.len(), 5);
        assert!(!loaded.details[1].success);
        assert_eq!(loaded.details[1].error.as_deref(), Some("HTTP 404"));
        assert_eq!(loaded.details[3].kind, SourceKind::Local);
    }

    #[tokio::test]
    async fn nothing_loaded_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        assert!(load_sources(&client, None, Some(dir.path())).await.is_err());
    }
}
