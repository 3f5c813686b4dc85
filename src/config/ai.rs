// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_daily_limit() -> u32 {
    200
}
fn default_excerpt_chars() -> usize {
    1500
}

/// Classification service settings (`[ai]` table or `settings.ai_config_path`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "mock"; anything else disables classification.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Real service calls allowed per UTC day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            daily_limit: default_daily_limit(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl ClassifierConfig {
    /// Parse a standalone settings file. Keys are resolved later, when the
    /// client is built.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        Ok(match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&data)?,
            _ => serde_json::from_str(&data)?,
        })
    }

    /// Normalise provider, resolve `"ENV"` keys and clamp numeric knobs.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "mock" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if self.excerpt_chars == 0 {
            self.excerpt_chars = default_excerpt_chars();
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();

        Ok(self)
    }
}
