use std::time::{Duration, Instant};

use async_trait::async_trait;
use m3u8_rs::Playlist;
use reqwest::{
    Url,
    header::{ACCEPT, CONTENT_TYPE},
};
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use crate::{
    error::VerifyError,
    model::{ProbeResult, Probed, StreamKind},
};

/// How many body bytes are read to decide what a URL serves
pub const SNIFF_LEN: usize = 2048;

/// One reachability/latency probe against a single URL.
///
/// Implementations must bound their own running time; the engine relies on
/// every probe finishing or failing on its own.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &Url) -> ProbeResult;
}

/// Probes URLs over HTTP: GET, check status, sniff the start of the body.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    #[must_use]
    pub const fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch_head(&self, url: &Url) -> Result<(Option<String>, Vec<u8>), VerifyError> {
        let res = self
            .client
            .get(url.clone())
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(|e| VerifyError::from_reqwest(&e, self.timeout))?;

        if !res.status().is_success() {
            return Err(VerifyError::HttpStatus(res.status().as_u16()));
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        // Live streams never end, so only the first few chunks are read
        let mut body = Vec::with_capacity(SNIFF_LEN);
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| VerifyError::from_reqwest(&e, self.timeout))?;
            body.extend_from_slice(&chunk);
            if body.len() >= SNIFF_LEN {
                break;
            }
        }

        Ok((content_type, body))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip_all, fields(url = %url))]
    async fn probe(&self, url: &Url) -> ProbeResult {
        let start = Instant::now();
        let (content_type, body) = tokio::time::timeout(self.timeout, self.fetch_head(url))
            .await
            .map_err(|_| VerifyError::ProbeTimeout(self.timeout))??;
        let latency = start.elapsed();

        let kind = classify(url, content_type.as_deref(), &body)?;
        debug!("{url} is reachable ({kind:?}, {}ms)", latency.as_millis());

        Ok(Probed { latency, kind })
    }
}

/// Decides what a reachable URL serves from its content type and first bytes
///
/// # Errors
/// [`VerifyError::MalformedResponse`] for empty bodies, HTML pages, and playlist
/// URLs that do not return a playlist
pub fn classify(url: &Url, content_type: Option<&str>, body: &[u8]) -> Result<StreamKind, VerifyError> {
    if body.is_empty() {
        return Err(VerifyError::MalformedResponse("empty body".to_string()));
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if let Some(kind) = playlist_kind(text, body) {
        return Ok(kind);
    }

    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return Err(VerifyError::MalformedResponse("not a valid M3U8 playlist".to_string()));
    }

    let looks_like_html = content_type.is_some_and(|t| t.starts_with("text/html"))
        || text.get(..15).is_some_and(|t| t.eq_ignore_ascii_case("<!doctype html>"))
        || text.get(..5).is_some_and(|t| t.eq_ignore_ascii_case("<html"));
    if looks_like_html {
        return Err(VerifyError::MalformedResponse("HTML page instead of a stream".to_string()));
    }

    Ok(StreamKind::Other)
}

fn playlist_kind(text: &str, body: &[u8]) -> Option<StreamKind> {
    if !text.starts_with("#EXTM3U") {
        return None;
    }
    if !(text.contains("#EXTINF") || text.contains("#EXT-X-STREAM-INF")) {
        return None;
    }

    // The sniffed prefix is usually a complete playlist; a truncated one may not parse
    match m3u8_rs::parse_playlist_res(body) {
        Ok(Playlist::MasterPlaylist(_)) => Some(StreamKind::MasterPlaylist),
        Ok(Playlist::MediaPlaylist(_)) => Some(StreamKind::MediaPlaylist),
        Err(_) if text.contains("#EXT-X-STREAM-INF") => Some(StreamKind::MasterPlaylist),
        Err(_) => Some(StreamKind::MediaPlaylist),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    const MEDIA: &str = indoc! {"
        #EXTM3U
        #EXT-X-VERSION:3
        #EXT-X-TARGETDURATION:6
        #EXT-X-MEDIA-SEQUENCE:1
        #EXTINF:6.0,
        seg1.ts
        #EXTINF:6.0,
        seg2.ts
    "};

    const MASTER: &str = indoc! {"
        #EXTM3U
        #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
        720p.m3u8
    "};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn classifies_playlists() {
        let u = url("http://a.tv/live.m3u8");
        assert_eq!(classify(&u, None, MEDIA.as_bytes()), Ok(StreamKind::MediaPlaylist));
        assert_eq!(classify(&u, None, MASTER.as_bytes()), Ok(StreamKind::MasterPlaylist));
    }

    #[test]
    fn playlist_url_must_return_playlist() {
        let u = url("http://a.tv/live.m3u8");
        assert!(matches!(
            classify(&u, Some("text/plain"), b"hello"),
            Err(VerifyError::MalformedResponse(_))
        ));
    }

    #[test]
    fn raw_stream_is_other() {
        let u = url("http://a.tv/live/1.ts");
        let ts_packet = [0x47_u8, 0x40, 0x00, 0x10, 0x00];
        assert_eq!(classify(&u, Some("video/mp2t"), &ts_packet), Ok(StreamKind::Other));
    }

    #[test]
    fn html_and_empty_bodies_are_malformed() {
        let u = url("http://a.tv/live/1.ts");
        assert!(classify(&u, Some("text/html; charset=utf-8"), b"<p>login</p>").is_err());
        assert!(classify(&u, None, b"<!DOCTYPE html><html>").is_err());
        assert!(classify(&u, None, b"").is_err());
    }

    #[tokio::test]
    async fn probes_reachable_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MEDIA))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(reqwest::Client::new(), Duration::from_secs(5));
        let probed = probe
            .probe(&url(&format!("{}/b.m3u8", server.uri())))
            .await
            .unwrap();
        assert_eq!(probed.kind, StreamKind::MediaPlaylist);
    }

    #[tokio::test]
    async fn reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(reqwest::Client::new(), Duration::from_secs(5));
        let err = probe
            .probe(&url(&format!("{}/gone.ts", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err, VerifyError::HttpStatus(404));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(MEDIA)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(200);
        let probe = HttpProbe::new(reqwest::Client::new(), timeout);
        let err = probe
            .probe(&url(&format!("{}/slow.m3u8", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err, VerifyError::ProbeTimeout(timeout));
    }

    #[tokio::test]
    async fn refused_connection() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpProbe::new(reqwest::Client::new(), Duration::from_secs(5));
        let err = probe
            .probe(&url(&format!("http://127.0.0.1:{port}/a.ts")))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::ProbeConnection(_)), "{err:?}");
    }
}
