use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Most IPTV servers only answer players, so probes look like one
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

/// Truncates a string to a maximum length, adding `...` to the end if it was truncated.
///
/// This function will continuously try to reduce length if string is being
/// truncated in the middle of a UTF codepoint
#[must_use]
pub fn truncate_string(string: &impl ToString, max_length: usize) -> String {
    let string = string.to_string();
    if string.len() <= max_length {
        return string;
    }

    let mut attempted_len = max_length.max(3);
    loop {
        if let Some(truncated) = string.get(..attempted_len - 3) {
            return format!("{truncated}...");
        }
        attempted_len -= 1;
    }
}

/// Warns when the open file limit is too low for `workers` concurrent probes.
///
/// Each probe holds a socket, and the deep checks spawn child processes with pipes.
#[cfg(unix)]
pub fn warn_ulimit(workers: usize) {
    let Ok((limit, _)) = rlimit::getrlimit(rlimit::Resource::NOFILE) else {
        return;
    };
    let wanted = (workers as u64).saturating_mul(8).max(1024);
    if limit < wanted {
        warn!(
            "Your file limit ({limit}) is low for {workers} workers and may cause spurious connection errors. Consider raising it via `ulimit -n {wanted}`"
        );
    }
}

#[cfg(not(unix))]
pub const fn warn_ulimit(_workers: usize) {}

/// # Errors
/// When the user agent contains invalid header characters or the TLS backend fails to initialize
pub fn init_http_client(user_agent: &str, connect_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert("User-Agent", HeaderValue::from_str(user_agent)?);

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(4)
        .build()?)
}

/// User agent for requests the tool makes on its own behalf (source lists, notifications)
#[must_use]
pub fn own_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Spawn a task that watches for CTRL + C and cancels a [`CancellationToken`] when caught.
///
/// A second CTRL + C exits immediately instead of waiting for in-flight probes.
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Caught CTRL+C, finishing in-flight probes. Press again to quit immediately");
        ct.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Caught second CTRL+C, exiting");
            std::process::exit(130);
        }
    });
}

/// Current time in China Standard Time (UTC+8), which reports are stamped with
#[must_use]
pub fn beijing_now() -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset)
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn as_millis<S: serde::Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(millis(*d))
}

#[allow(clippy::ref_option)]
pub(crate) fn opt_millis<S: serde::Serializer>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => serializer.serialize_some(&millis(*d)),
        None => serializer.serialize_none(),
    }
}
