use std::{path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    engine::EngineConfig,
    group::{DEFAULT_CATCH_ALL, GroupRuleSpec, GroupRules, default_output_order, default_rules},
    util::BROWSER_USER_AGENT,
};

/// Tunables read from the optional TOML settings file.
///
/// Every field is optional in the file; missing ones fall back to [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub workers: usize,
    pub probe_timeout_secs: u64,
    pub fallback_cap: usize,
    pub trust_host_outcome: bool,

    pub deep_validation: bool,
    pub content_check_timeout_secs: u64,
    pub soft_error_timeout_secs: u64,
    /// Tesseract language spec, e.g. `eng+chi_sim`
    pub ocr_languages: String,
    /// On-screen text that marks a stream as a soft error (case-insensitive)
    pub soft_error_phrases: Vec<String>,

    pub group_rules: Vec<GroupRuleSpec>,
    pub catch_all_group: String,
    pub group_order: Vec<String>,

    pub logo_base_url: String,
    pub epg_url: String,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 15,
            probe_timeout_secs: 8,
            fallback_cap: 3,
            trust_host_outcome: true,
            deep_validation: true,
            content_check_timeout_secs: 10,
            soft_error_timeout_secs: 17,
            ocr_languages: "eng+chi_sim".to_string(),
            soft_error_phrases: [
                "login",
                "sign in",
                "geo-block",
                "not available",
                "invalid",
                "expired",
                "test stream",
                "demo",
                "black screen",
                "请登录",
                "区域限制",
                "套餐",
                "购买",
                "403",
                "unauthorized",
            ]
            .map(String::from)
            .to_vec(),
            group_rules: default_rules(),
            catch_all_group: DEFAULT_CATCH_ALL.to_string(),
            group_order: default_output_order(),
            logo_base_url: "https://raw.githubusercontent.com/alantang1977/iptv_api/main/pic/logos/".to_string(),
            epg_url: "https://live.fanmingming.com/e.xml".to_string(),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, or returns the defaults when no path is given.
    ///
    /// # Errors
    /// When the file cannot be read, is not valid TOML, or holds out-of-range values
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Reading settings file {path:?}"))?;
        let settings = Self::parse(&body).with_context(|| format!("Parsing settings file {path:?}"))?;
        info!("Loaded settings from {path:?}");
        Ok(settings)
    }

    /// # Errors
    /// When `body` is not valid TOML or holds out-of-range values
    pub fn parse(body: &str) -> Result<Self> {
        let settings: Self = toml::from_str(body)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.workers > 0, "`workers` must be at least 1");
        ensure!(self.fallback_cap > 0, "`fallback_cap` must be at least 1");
        ensure!(self.probe_timeout_secs > 0, "`probe_timeout_secs` must be at least 1");
        ensure!(
            self.content_check_timeout_secs > 0 && self.soft_error_timeout_secs > 0,
            "check timeouts must be at least 1 second"
        );
        Ok(())
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn content_check_timeout(&self) -> Duration {
        Duration::from_secs(self.content_check_timeout_secs)
    }

    #[must_use]
    pub const fn soft_error_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_error_timeout_secs)
    }

    /// # Errors
    /// When a group rule pattern does not compile
    pub fn group_rules(&self) -> Result<GroupRules> {
        GroupRules::compile(&self.group_rules, self.catch_all_group.clone())
    }

    #[must_use]
    pub fn engine_config(&self, progress: bool) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            fallback_cap: self.fallback_cap,
            trust_host_outcome: self.trust_host_outcome,
            output_order: self.group_order.clone(),
            progress,
        }
    }
}
