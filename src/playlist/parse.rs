use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use tracing::debug;

static URL_JUNK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[$•].*|\s+.*").unwrap());
static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z][\w-]*)="([^"]*)""#).unwrap());

/// One `name → url` line of a source playlist, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Display name as written in the source
    pub name: String,
    pub url: String,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
    pub group_title: Option<String>,
}

/// Strips player hints (`$label`, `•`, anything after whitespace) and trailing `/?&`
#[must_use]
pub fn clean_url(raw: &str) -> String {
    URL_JUNK_REGEX
        .replace(raw.trim(), "")
        .trim_end_matches(['/', '?', '&'])
        .to_string()
}

/// An http(s) URL with a host
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()))
}

/// Parses either format, telling them apart by the `#EXTM3U` header and an `#EXTINF` line near the top
#[must_use]
pub fn parse_playlist(body: &str) -> Vec<Entry> {
    let head = body.trim_start().chars().take(200).collect::<String>().to_uppercase();
    if head.contains("#EXTM3U") && head.contains("#EXTINF") {
        parse_m3u(body)
    } else {
        parse_txt(body)
    }
}

/// Extended M3U: `#EXTINF:-1 attr="..." ...,<name>` followed by the URL line
#[must_use]
pub fn parse_m3u(body: &str) -> Vec<Entry> {
    let lines = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>();

    let mut entries = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if !line.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("#EXTINF:")) {
            i += 1;
            continue;
        }
        let Some(next) = lines.get(i + 1).filter(|l| !l.starts_with('#')) else {
            i += 1;
            continue;
        };

        let url = clean_url(next);
        if is_valid_url(&url) {
            entries.push(parse_extinf(line, url));
        } else {
            debug!("Skipping invalid stream URL {next:?}");
        }
        i += 2;
    }
    entries
}

fn parse_extinf(line: &str, url: String) -> Entry {
    let info = &line[8..];
    let (attributes, name) = split_title(info);
    let name = name.map_or("Unknown", str::trim);

    let mut entry = Entry {
        name: if name.is_empty() { "Unknown" } else { name }.to_string(),
        url,
        ..Entry::default()
    };
    for cap in ATTRIBUTE_REGEX.captures_iter(attributes) {
        let value = cap[2].trim();
        if value.is_empty() {
            continue;
        }
        match cap[1].to_ascii_lowercase().as_str() {
            "tvg-id" => entry.tvg_id = Some(value.to_string()),
            "tvg-logo" => entry.logo = Some(value.to_string()),
            "group-title" => entry.group_title = Some(value.to_string()),
            _ => {}
        }
    }
    entry
}

/// Splits `-1 attr="a,b",Name` at the first comma outside quotes
fn split_title(info: &str) -> (&str, Option<&str>) {
    let mut in_quotes = false;
    for (pos, ch) in info.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (&info[..pos], Some(&info[pos + 1..])),
            _ => {}
        }
    }
    (info, None)
}

/// TXT genre format: `<group>,#genre#` headers followed by `<name>,<url>` lines
#[must_use]
pub fn parse_txt(body: &str) -> Vec<Entry> {
    let mut group = None;
    let mut entries = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_suffix(",#genre#") {
            group = Some(header.trim().to_string()).filter(|g| !g.is_empty());
            continue;
        }

        let Some((name, url)) = line.split_once(',') else {
            continue;
        };
        if url.contains(',') {
            continue;
        }
        let url = clean_url(url);
        if !is_valid_url(&url) {
            continue;
        }

        entries.push(Entry {
            name: name.trim().to_string(),
            url,
            group_title: group.clone(),
            ..Entry::default()
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_urls() {
        assert_eq!(clean_url(" http://a.tv/live.m3u8$高清 "), "http://a.tv/live.m3u8");
        assert_eq!(clean_url("http://a.tv/live/?"), "http://a.tv/live");
        assert_eq!(clean_url("http://a.tv/1.ts•备用"), "http://a.tv/1.ts");
        assert_eq!(clean_url("http://a.tv/1.ts #comment"), "http://a.tv/1.ts");
    }

    #[test]
    fn validates_urls() {
        assert!(is_valid_url("https://a.tv/1.m3u8"));
        assert!(!is_valid_url("rtmp://a.tv/live"));
        assert!(!is_valid_url("http://"));
        assert!(!is_valid_url("a.tv/1.m3u8"));
    }

    #[test]
    fn parses_extended_m3u() {
        let body = indoc::indoc! {r#"
            #EXTM3U x-tvg-url="http://epg.example/e.xml"
            #EXTINF:-1 tvg-id="CCTV1" tvg-logo="http://logo/cctv1.png" group-title="央视,卫视",CCTV-1 综合
            http://live1.example/b.m3u8$main

            #EXTINF:-1,湖南卫视
            #EXTVLCOPT:http-user-agent=x
            #EXTINF:-1,Broken
            rtmp://nope/live
            #extinf:-1 group-title="",Lowercase Tag
            http://live2.example/c.ts
        "#};

        let entries = parse_playlist(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            Entry {
                name: "CCTV-1 综合".to_string(),
                url: "http://live1.example/b.m3u8".to_string(),
                logo: Some("http://logo/cctv1.png".to_string()),
                tvg_id: Some("CCTV1".to_string()),
                group_title: Some("央视,卫视".to_string()),
            }
        );
        assert_eq!(entries[1].name, "Lowercase Tag");
        assert_eq!(entries[1].group_title, None);
    }

    #[test]
    fn parses_genre_txt() {
        let body = indoc::indoc! {"
            央视频道,#genre#
            CCTV1,http://a.tv/1.m3u8
            CCTV2,ftp://a.tv/2
            bad line
            a,b,c
            卫视频道,#genre#
            湖南卫视,http://b.tv/hn.m3u8$备用
        "};

        let entries = parse_playlist(body);
        assert_eq!(
            entries
                .iter()
                .map(|e| (e.name.as_str(), e.url.as_str(), e.group_title.as_deref()))
                .collect::<Vec<_>>(),
            vec![
                ("CCTV1", "http://a.tv/1.m3u8", Some("央视频道")),
                ("湖南卫视", "http://b.tv/hn.m3u8", Some("卫视频道")),
            ]
        );
    }
}
