//! Pipeline configuration: settings, sources, delivery rules and webhooks.
//!
//! File shape (TOML; JSON with the same keys also works):
//!
//! ```toml
//! [settings]
//! default_destination = "news"
//! concurrency = 5
//!
//! [[sources]]
//! name = "TechWire"
//! url = "https://techwire.example/rss"
//! category = "Technology"
//! trust_score = 0.9
//!
//! [[rules]]
//! destination = "tech"
//! categories = ["Technology"]
//! min_trust = 0.7
//! style = "detailed"
//!
//! [webhooks]
//! news = "https://discord.com/api/webhooks/..."
//! ```
//!
//! [`HotReloadConfig`] re-reads the file when its mtime changes; the
//! orchestrator asks for the current config once per cycle.

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use crate::config::ai::ClassifierConfig;
use crate::error::PipelineError;
use crate::model::Source;
use crate::render::RenderLimits;
use crate::router::DeliveryRule;
use crate::trust::TrustPriors;

pub const ENV_CONFIG_PATH: &str = "NEWSRELAY_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/pipeline.toml";
pub const DEFAULT_JSON_PATH: &str = "config/pipeline.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Always receives every routed item unless a source override applies.
    pub default_destination: String,
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub max_items_per_source: usize,
    pub user_agent: String,
    pub dedup_ttl_secs: i64,
    pub send_delay_ms: u64,
    pub fetch_interval_secs: u64,
    pub max_message_chars: usize,
    /// Plain-text message limit; embeds use `max_message_chars`.
    pub max_text_chars: usize,
    pub max_field_chars: usize,
    pub max_blocks_per_message: usize,
    /// Receives the periodic digest when set.
    pub digest_destination: Option<String>,
    pub digest_interval_secs: u64,
    /// Moderation gate on/off.
    pub content_filtering: bool,
    /// Optional JSON table of trust priors; built-in seed otherwise.
    pub trust_priors_path: Option<String>,
    /// Classifier settings file (JSON or TOML); replaces the `[ai]` table.
    pub ai_config_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_destination: String::new(),
            concurrency: 5,
            fetch_timeout_secs: 30,
            max_items_per_source: 5,
            user_agent: concat!("newsrelay/", env!("CARGO_PKG_VERSION")).to_string(),
            dedup_ttl_secs: 24 * 60 * 60,
            send_delay_ms: 500,
            fetch_interval_secs: 15 * 60,
            max_message_chars: 6000,
            max_text_chars: 2000,
            max_field_chars: 1024,
            max_blocks_per_message: 10,
            digest_destination: None,
            digest_interval_secs: 24 * 60 * 60,
            content_filtering: true,
            trust_priors_path: None,
            ai_config_path: None,
        }
    }
}

impl Settings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs.max(1))
    }

    pub fn digest_interval(&self) -> Duration {
        Duration::from_secs(self.digest_interval_secs.max(60))
    }

    pub fn render_limits(&self) -> RenderLimits {
        RenderLimits {
            max_total_chars: self.max_message_chars,
            max_text_chars: self.max_text_chars,
            max_field_chars: self.max_field_chars,
            max_blocks: self.max_blocks_per_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub rules: Vec<DeliveryRule>,
    /// Destination id → webhook URL.
    #[serde(default)]
    pub webhooks: HashMap<String, String>,
    #[serde(default)]
    pub ai: ClassifierConfig,
}

impl PipelineConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        cfg.finalize()?;
        Ok(cfg)
    }

    /// Resolve the config path using env var + fallbacks:
    /// 1) $NEWSRELAY_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Ok(pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Ok(pb);
            }
        }
        Err(anyhow!(
            "no pipeline config found (set {ENV_CONFIG_PATH} or create {DEFAULT_TOML_PATH})"
        ))
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Validate, then fill trust priors and clean up lists.
    pub fn finalize(&mut self) -> Result<(), PipelineError> {
        self.settings.default_destination = self.settings.default_destination.trim().to_string();
        if self.settings.default_destination.is_empty() {
            return Err(PipelineError::Config(
                "settings.default_destination is required".into(),
            ));
        }
        if self.settings.concurrency == 0 {
            self.settings.concurrency = 1;
        }

        let mut names = HashSet::new();
        for s in &mut self.sources {
            s.name = s.name.trim().to_string();
            if s.name.is_empty() {
                return Err(PipelineError::Config("source with empty name".into()));
            }
            if !names.insert(s.name.to_lowercase()) {
                return Err(PipelineError::Config(format!(
                    "duplicate source name: {}",
                    s.name
                )));
            }
        }

        let priors = match &self.settings.trust_priors_path {
            Some(p) => TrustPriors::load_from_file(p),
            None => TrustPriors::default_seed(),
        };
        self.resolve_trust(&priors);

        if let Some(p) = &self.settings.ai_config_path {
            self.ai = ClassifierConfig::load_from_file(p)
                .map_err(|e| PipelineError::Config(format!("classifier config {p}: {e:#}")))?;
        }

        for r in &mut self.rules {
            r.destination = r.destination.trim().to_string();
            r.categories = clean_list(std::mem::take(&mut r.categories));
            r.include_sources = clean_list(std::mem::take(&mut r.include_sources));
            r.exclude_sources = clean_list(std::mem::take(&mut r.exclude_sources));
        }
        self.rules.retain(|r| !r.destination.is_empty());

        Ok(())
    }

    /// Fill `trust_score` from the prior table where the source leaves it unset.
    pub fn resolve_trust(&mut self, priors: &TrustPriors) {
        for s in &mut self.sources {
            if s.trust_score.is_none() {
                s.trust_score = Some(priors.prior_for(&s.name));
            }
        }
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn rule_for(&self, destination: &str) -> Option<&DeliveryRule> {
        self.rules.iter().find(|r| r.destination == destination)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    match hint_ext {
        "toml" => toml::from_str(s).map_err(|e| anyhow!("invalid TOML: {e}")),
        "json" => serde_json::from_str(s).map_err(|e| anyhow!("invalid JSON: {e}")),
        _ => toml::from_str(s)
            .or_else(|_| serde_json::from_str(s))
            .map_err(|e| anyhow!("neither TOML nor JSON: {e}")),
    }
}

fn clean_list(v: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(v.len());
    for s in v {
        let t = s.trim();
        if !t.is_empty() && !out.iter().any(|x: &String| x.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

/// Hot-reload wrapper: reloads when the config file mtime changes, keeping
/// the last good config if the new content does not load.
#[derive(Debug)]
pub struct HotReloadConfig {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    config: Arc<PipelineConfig>,
    last_modified: Option<SystemTime>,
}

impl HotReloadConfig {
    /// Initial load is fatal on error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let last_modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        let config = PipelineConfig::load_from(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(State {
                config: Arc::new(config),
                last_modified,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest config, reloading if the file changed since the last call.
    pub fn current(&self) -> Arc<PipelineConfig> {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => {
                return self
                    .inner
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .config
                    .clone()
            }
        };

        {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if guard.last_modified == Some(mtime) {
                return guard.config.clone();
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Double-check in case another caller reloaded first.
        if guard.last_modified != Some(mtime) {
            guard.last_modified = Some(mtime);
            match PipelineConfig::load_from(&self.path) {
                Ok(cfg) => {
                    tracing::info!(
                        path = %self.path.display(),
                        sources = cfg.sources.len(),
                        rules = cfg.rules.len(),
                        "pipeline config reloaded"
                    );
                    guard.config = Arc::new(cfg);
                }
                Err(e) => {
                    tracing::warn!(error = ?e, path = %self.path.display(), "config reload failed; keeping previous");
                }
            }
        }
        guard.config.clone()
    }
}
