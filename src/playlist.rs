use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::model::ChannelRecord;

pub mod normalize;
pub mod parse;

pub use normalize::normalize_name;
pub use parse::{Entry, clean_url, is_valid_url, parse_playlist};

/// Merges source entries into channels keyed by normalized name.
///
/// Channels keep first-appearance order and so do their URLs. A URL is kept
/// only the first time it appears anywhere in the input, so a channel whose
/// URLs all showed up earlier under another name is dropped.
#[must_use]
pub fn aggregate(entries: impl IntoIterator<Item = Entry>) -> Vec<ChannelRecord> {
    let mut channels: Vec<ChannelRecord> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut raw = 0usize;

    for entry in entries {
        raw += 1;
        if !seen_urls.insert(entry.url.clone()) {
            debug!("Duplicate URL for {}: {}", entry.name, entry.url);
            continue;
        }

        let name = normalize_name(&entry.name);
        let index = *by_name.entry(name.clone()).or_insert_with(|| {
            channels.push(ChannelRecord::new(name, Vec::<String>::new()));
            channels.len() - 1
        });

        let channel = &mut channels[index];
        channel.urls.push(entry.url);
        if channel.logo.is_none() {
            channel.logo = entry.logo;
        }
        if channel.tvg_id.is_none() {
            channel.tvg_id = entry.tvg_id;
        }
    }

    info!(
        "Merged {raw} entries into {} channels with {} unique URLs",
        channels.len(),
        seen_urls.len()
    );
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, url: &str) -> Entry {
        Entry {
            name: name.to_string(),
            url: url.to_string(),
            ..Entry::default()
        }
    }

    #[test]
    fn merges_by_normalized_name() {
        let mut with_logo = entry("CCTV-1 高清", "http://b.tv/1.m3u8");
        with_logo.logo = Some("http://logo/cctv1.png".to_string());

        let channels = aggregate([
            entry("CCTV1", "http://a.tv/1.m3u8"),
            entry("湖南卫视", "http://a.tv/hn.m3u8"),
            with_logo,
            entry("CCTV1综合", "http://a.tv/1.m3u8"),
        ]);

        assert_eq!(
            channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["CCTV1", "湖南卫视"]
        );
        assert_eq!(channels[0].urls, vec!["http://a.tv/1.m3u8", "http://b.tv/1.m3u8"]);
        assert_eq!(channels[0].logo.as_deref(), Some("http://logo/cctv1.png"));
    }

    #[test]
    fn url_is_kept_once_across_channels() {
        let channels = aggregate([
            entry("A", "http://a.tv/x.ts"),
            entry("B", "http://a.tv/x.ts"),
            entry("B", "http://a.tv/y.ts"),
        ]);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].urls, vec!["http://a.tv/y.ts"]);
    }
}
