#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{io::IsTerminal, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Result, ensure};
use clap::Parser;
use iptv_sieve::{
    blacklist::Blacklist,
    config::Settings,
    engine::Engine,
    notify::notify_run,
    output::{M3uOptions, write_json, write_m3u, write_markdown},
    playlist::aggregate,
    probe::HttpProbe,
    sources::load_sources,
    tools::detect_capabilities,
    util::{beijing_now, init_http_client, own_user_agent, spawn_ct_watcher, warn_ulimit},
    validate::{Capabilities, Validator},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Verifies IPTV sources and writes a ranked playlist of the streams that play
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File listing remote playlist URLs, one per line
    #[arg(long, env = "IPTV_SOURCES", default_value = "config/remote_sources.txt")]
    sources: PathBuf,

    /// Directory of local `.m3u` / `.txt` playlists
    #[arg(long, env = "IPTV_LOCAL_DIR", default_value = "local_playlists")]
    local_dir: PathBuf,

    /// Host blacklist, one `host` or `host:port` per line
    #[arg(long, env = "IPTV_BLACKLIST", default_value = "config/blackHost_list.txt")]
    blacklist: PathBuf,

    /// TOML settings file (defaults apply when omitted)
    #[arg(short, long, env = "IPTV_SIEVE_CONFIG")]
    config: Option<PathBuf>,

    /// Where to write the verified playlist
    #[arg(short, long, default_value = "output/live.m3u")]
    output: PathBuf,

    /// Where to write the Markdown report
    #[arg(long, default_value = "output/report.md")]
    report: PathBuf,

    /// Also write the full run report as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Maximum number of concurrent network operations (overrides the settings file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Skip the ffprobe / OCR checks even when the tools are installed
    #[arg(long)]
    no_deep_validation: bool,

    /// Bark device key to push the run summary to
    #[arg(long, env = "BARK_DEVICE_KEY", hide_env_values = true)]
    bark_key: Option<String>,

    /// Hide the progress bars
    #[arg(long)]
    no_progress: bool,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug);

    let mut settings = Settings::load(args.config.as_deref()).await?;
    if let Some(workers) = args.workers {
        ensure!(workers > 0, "--workers must be at least 1");
        settings.workers = workers;
    }
    if args.no_deep_validation {
        settings.deep_validation = false;
    }
    warn_ulimit(settings.workers);

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    let own_client = init_http_client(&own_user_agent(), Duration::from_secs(10))?;
    let probe_client = init_http_client(&settings.user_agent, settings.probe_timeout())?;

    let list = if args.sources.is_file() {
        Some(args.sources.as_path())
    } else {
        warn!("Source list {:?} not found, using local playlists only", args.sources);
        None
    };
    let loaded = load_sources(&own_client, list, Some(&args.local_dir)).await?;
    let channels = aggregate(loaded.entries);

    let blacklist = Blacklist::load(&args.blacklist).await?;

    let capabilities = if settings.deep_validation {
        detect_capabilities(
            settings.probe_timeout(),
            &settings.ocr_languages,
            &settings.soft_error_phrases,
        )
    } else {
        info!("Deep validation disabled");
        Capabilities::none()
    };
    capabilities.log_summary();

    let group_rules = settings.group_rules()?;
    info!("Channels matching no group rule go to {}", group_rules.catch_all());

    let engine = Engine::new(
        Arc::new(HttpProbe::new(probe_client, settings.probe_timeout())),
        Validator::new(
            capabilities,
            settings.content_check_timeout(),
            settings.soft_error_timeout(),
        ),
        blacklist,
        group_rules,
        settings.engine_config(!args.no_progress && std::io::stderr().is_terminal()),
    );

    info!("Verifying {} channels with {} workers", channels.len(), settings.workers);
    let output = engine.run(channels, &ct).await;
    let report = output.report();
    let stats = &report.stats;
    info!(
        "{} accepted, {} accepted without validation, {} rejected, {} not verified",
        stats.accepted, stats.degraded, stats.rejected, stats.incomplete
    );
    info!(
        "{} of {} hosts reachable ({:.1}%)",
        stats.alive_hosts, stats.unique_hosts, stats.survival_rate
    );

    let generated_at = beijing_now();
    write_m3u(
        &args.output,
        &output.playlist,
        &M3uOptions {
            epg_url: &settings.epg_url,
            logo_base_url: &settings.logo_base_url,
        },
    )
    .await?;
    write_markdown(&args.report, &report, &loaded.details, generated_at).await?;
    if let Some(path) = &args.json {
        write_json(path, &report).await?;
    }

    if report.complete {
        notify_run(&own_client, args.bark_key.as_deref(), stats, generated_at).await;
        info!("All done successfully!");
    } else {
        warn!("Run was cancelled, outputs hold partial results");
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,iptv_sieve=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
