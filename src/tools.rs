use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    error::VerifyError,
    util::BROWSER_USER_AGENT,
    validate::{Capabilities, CheckOutcome, ContentCheck, SoftErrorCheck},
};

/// Locates the external tools once and wires up whichever checks they support
#[must_use]
pub fn detect_capabilities(network_timeout: Duration, languages: &str, phrases: &[String]) -> Capabilities {
    let ffprobe = locate("ffprobe");
    let ffmpeg = locate("ffmpeg");
    let tesseract = locate("tesseract");

    Capabilities {
        content: ffprobe.map(|path| {
            Arc::new(FfprobeCheck {
                ffprobe: path,
                network_timeout,
            }) as Arc<dyn ContentCheck>
        }),
        soft_error: ffmpeg.zip(tesseract).map(|(ffmpeg, tesseract)| {
            Arc::new(OcrCheck {
                ffmpeg,
                tesseract,
                languages: languages.to_string(),
                phrases: phrases.iter().map(|p| p.to_lowercase()).collect(),
            }) as Arc<dyn SoftErrorCheck>
        }),
    }
}

fn locate(tool: &str) -> Option<PathBuf> {
    let found = which::which(tool).ok();
    debug!("Looking up {tool}: {found:?}");
    found
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

/// Content-stream check backed by `ffprobe -show_streams`
#[derive(Debug, Clone)]
pub struct FfprobeCheck {
    ffprobe: PathBuf,
    network_timeout: Duration,
}

#[async_trait]
impl ContentCheck for FfprobeCheck {
    #[instrument(skip(self))]
    async fn check(&self, url: &str) -> CheckOutcome {
        let io_timeout = self.network_timeout.as_micros().to_string();
        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-timeout",
                io_timeout.as_str(),
                "-user_agent",
                BROWSER_USER_AGENT,
                url,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) => return CheckOutcome::Inconclusive(format!("spawning ffprobe: {e}")),
        };
        if !output.status.success() {
            return CheckOutcome::Fail(VerifyError::InvalidContentStream);
        }

        match serde_json::from_slice::<FfprobeOutput>(&output.stdout) {
            Ok(probe) if has_media_stream(&probe) => CheckOutcome::Pass,
            Ok(_) => CheckOutcome::Fail(VerifyError::InvalidContentStream),
            Err(e) => CheckOutcome::Inconclusive(format!("parsing ffprobe output: {e}")),
        }
    }
}

fn has_media_stream(probe: &FfprobeOutput) -> bool {
    probe
        .streams
        .iter()
        .any(|s| matches!(s.codec_type.as_deref(), Some("video" | "audio")))
}

/// Soft error check: grab one frame with ffmpeg, OCR it with tesseract
#[derive(Debug, Clone)]
pub struct OcrCheck {
    ffmpeg: PathBuf,
    tesseract: PathBuf,
    languages: String,
    /// Lowercased failure phrases
    phrases: Vec<String>,
}

impl OcrCheck {
    async fn grab_frame(&self, url: &str, frame: &Path) -> Result<(), String> {
        let status = tokio::process::Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-user_agent", BROWSER_USER_AGENT, "-i", url])
            .args(["-ss", "1", "-vframes", "1"])
            .arg(frame)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| spawn_error("ffmpeg", &e))?;

        if !status.success() || !frame.exists() {
            return Err("could not capture a frame".to_string());
        }
        Ok(())
    }

    async fn read_text(&self, frame: &Path) -> Result<String, String> {
        let output = tokio::process::Command::new(&self.tesseract)
            .arg(frame)
            .args(["stdout", "-l", self.languages.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error("tesseract", &e))?;

        if !output.status.success() {
            return Err(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_lowercase())
    }
}

#[async_trait]
impl SoftErrorCheck for OcrCheck {
    #[instrument(skip(self))]
    async fn check(&self, url: &str) -> CheckOutcome {
        // Dropped (and deleted) when the check returns, including on timeout
        let workdir = match tempfile::Builder::new().prefix("iptv-sieve-ocr").tempdir() {
            Ok(dir) => dir,
            Err(e) => return CheckOutcome::Inconclusive(format!("creating frame directory: {e}")),
        };
        let frame = workdir.path().join("frame.png");

        if let Err(detail) = self.grab_frame(url, &frame).await {
            return CheckOutcome::Inconclusive(detail);
        }
        let text = match self.read_text(&frame).await {
            Ok(t) => t,
            Err(detail) => return CheckOutcome::Inconclusive(detail),
        };

        match find_phrase(&text, &self.phrases) {
            Some(phrase) => {
                debug!("Found soft error phrase {phrase:?} on {url}");
                CheckOutcome::Fail(VerifyError::SoftErrorDetected(phrase.to_string()))
            }
            None => CheckOutcome::Pass,
        }
    }
}

fn find_phrase<'a>(text: &str, phrases: &'a [String]) -> Option<&'a str> {
    phrases
        .iter()
        .find(|p| !p.is_empty() && text.contains(p.as_str()))
        .map(String::as_str)
}

fn spawn_error(tool: &str, e: &std::io::Error) -> String {
    if e.kind() == ErrorKind::NotFound {
        format!("`{tool}` is not installed or available in PATH")
    } else {
        format!("spawning {tool}: {e}")
    }
}
