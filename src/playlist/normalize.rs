use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Known spellings of the same channel, matched as substrings
const ALIASES: &[(&str, &str)] = &[
    ("CCTV1综合", "CCTV1"),
    ("CCTV-1", "CCTV1"),
    ("CCTV1高清", "CCTV1"),
    ("CCTV1HD", "CCTV1"),
    ("CCTV-2财经", "CCTV2"),
    ("CCTV2财经", "CCTV2"),
    ("CCTV2高清", "CCTV2"),
    ("CCTV-3综艺", "CCTV3"),
    ("CCTV3综艺", "CCTV3"),
    ("CCTV-5体育", "CCTV5"),
    ("CCTV5体育", "CCTV5"),
    ("CCTV5+体育赛事", "CCTV5+"),
    ("CCTV5加", "CCTV5+"),
    ("CCTV-13新闻", "CCTV13"),
    ("CCTV13新闻", "CCTV13"),
    ("CGTN纪录", "CGTN Documentary"),
    ("CGTN英语", "CGTN"),
    ("湖南卫视高清", "湖南卫视"),
    ("浙江卫视高清", "浙江卫视"),
    ("江苏卫视超清", "江苏卫视"),
    ("东方卫视高清", "东方卫视"),
    ("北京卫视高清", "北京卫视"),
    ("广东卫视高清", "广东卫视"),
    ("深圳卫视高清", "深圳卫视"),
    ("翡翠台", "TVB Jade"),
    ("明珠台", "TVB Pearl"),
    ("凤凰中文台", "Phoenix Chinese Channel"),
    ("凤凰资讯台", "Phoenix InfoNews Channel"),
    ("中天综合台", "CTi Variety"),
    ("中天新闻台", "CTi News"),
    ("东森新闻台", "ETTV News"),
    ("东森洋片台", "ETTV Foreign Movies"),
    ("金鹰卡通高清", "金鹰卡通"),
    ("卡酷少儿", "卡酷动画"),
    ("哈哈炫动卫视", "哈哈炫动"),
];

/// Aliases longest first, so `CCTV5+体育赛事` wins over `CCTV5体育`
static SORTED_ALIASES: LazyLock<Vec<(&str, &str)>> = LazyLock::new(|| {
    let mut aliases = ALIASES.to_vec();
    aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.chars().count()));
    aliases
});

static BRACKETS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[(（【\[][^)）】\]]*[)）】\]]\s*").unwrap());
static SEPARATORS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-·•_|]+").unwrap());
// ASCII words like TV or Channel only count as a suffix after a space, so `CCTV` keeps its `TV`
static SUFFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:FHD|UHD|HD|超高清|高清|蓝光|标清|综合频道?|电视频道?|直播频道?|官方频道?|频道|台|官方|正版|流畅|备用|测试|咪咕|真|极速|\s(?:4K|TV|CH|Channel))$",
    )
    .unwrap()
});
static CCTV_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^CCTV[-\s]*([0-9][0-9\s+\-k]*)").unwrap());
static CGTN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^CGTN[-\s]+").unwrap());

/// Canonical display name, used both to merge sources and to pick a group.
///
/// `CCTV-01 高清` and `CCTV1HD` both become `CCTV1`.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let mut original = raw.trim();
    if original.is_empty() {
        return "Unknown".to_string();
    }

    // `A-B-C` lists several channels, the first one is the real name
    if original.split('-').count() >= 3 {
        if let Some((first, _)) = original.split_once('-') {
            original = first.trim();
        }
    }

    if let Some((_, canonical)) = SORTED_ALIASES.iter().find(|(alias, _)| contains_alias(original, alias)) {
        return (*canonical).to_string();
    }

    let name = BRACKETS_REGEX.replace_all(original, "");
    let name = SEPARATORS_REGEX.replace_all(&name, " ");
    // Numbers first, so `CCTV 4K` becomes `CCTV4K` before `4K` could be read as a suffix
    let name = CCTV_REGEX.replace(name.trim(), |caps: &Captures| cctv_number(caps));
    let name = SUFFIX_REGEX.replace(name.trim(), "");
    let name = CGTN_REGEX.replace(name.trim(), "CGTN ");

    let cleaned = name.trim();
    if cleaned.is_empty() {
        original.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Substring match that does not split a number: `CCTV-1` is not in `CCTV-13`
fn contains_alias(name: &str, alias: &str) -> bool {
    name.match_indices(alias)
        .any(|(pos, _)| !name[pos + alias.len()..].starts_with(|c: char| c.is_ascii_digit()))
}

fn cctv_number(caps: &Captures) -> String {
    let part = &caps[1];
    let digits = part
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    let Ok(number) = digits.parse::<u32>() else {
        return caps[0].to_string();
    };

    let suffix = if part.contains('+') {
        "+"
    } else if part.contains(['k', 'K']) {
        "K"
    } else {
        ""
    };
    format!("CCTV{number}{suffix}")
}
