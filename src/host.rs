use std::fmt;

use reqwest::Url;

use crate::error::VerifyError;

/// Network endpoint identity of a stream URL: `scheme://host:port`.
///
/// Default ports are filled in, so `http://a.tv/x` and `http://a.tv:80/y` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    scheme: String,
    host: String,
    port: u16,
}

impl HostKey {
    /// # Errors
    /// When the URL has no host or no known default port
    pub fn from_url(url: &Url) -> Result<Self, VerifyError> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| VerifyError::InvalidUrl(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| VerifyError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// The `host:port` part, which is what blacklists match on
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Parses a candidate stream URL, accepting only http(s) URLs with a host.
///
/// # Errors
/// [`VerifyError::InvalidUrl`] for anything else
pub fn parse_stream_url(raw: &str) -> Result<(Url, HostKey), VerifyError> {
    let url = Url::parse(raw.trim()).map_err(|_| VerifyError::InvalidUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(VerifyError::InvalidUrl(raw.to_string()));
    }
    let key = HostKey::from_url(&url)?;
    Ok((url, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_default_ports() {
        let (_, http) = parse_stream_url("http://Live1.Example/b.m3u8").unwrap();
        assert_eq!(http.to_string(), "http://live1.example:80");
        assert_eq!(http.authority(), "live1.example:80");

        let (_, https) = parse_stream_url("https://live1.example/b.m3u8").unwrap();
        assert_eq!(https.authority(), "live1.example:443");
        assert_ne!(http, https);
    }

    #[test]
    fn explicit_port_matches_default() {
        let (_, a) = parse_stream_url("http://a.tv/x.ts").unwrap();
        let (_, b) = parse_stream_url("http://a.tv:80/y.ts").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_http() {
        assert!(matches!(
            parse_stream_url("rtmp://a.tv/live"),
            Err(VerifyError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_stream_url("not a url"),
            Err(VerifyError::InvalidUrl(_))
        ));
    }
}
