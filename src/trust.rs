//! # Trust priors
//!
//! Fallback trust prior for sources whose config does not pin `trust_score`.
//!
//! - Loads from JSON (`priors` + `aliases`), or uses the built-in seed.
//! - Case-insensitive lookup with punctuation and dash normalisation.
//! - Lookup order: alias → exact → whole-word containment (longest key wins) → default.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

use crate::model::DEFAULT_TRUST;

#[derive(Debug, Clone, Deserialize)]
pub struct TrustPriors {
    #[serde(default = "default_prior")]
    pub default_prior: f64,
    #[serde(default)]
    pub priors: HashMap<String, f64>,
    /// Alternative spelling → canonical key.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_prior() -> f64 {
    DEFAULT_TRUST
}

impl Default for TrustPriors {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl TrustPriors {
    /// Load from a JSON file, falling back to the seed on any error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<TrustPriors>(&s) {
                Ok(mut p) => {
                    p.priors = p
                        .priors
                        .into_iter()
                        .map(|(k, v)| (normalize(&k), v))
                        .collect();
                    p.aliases = p
                        .aliases
                        .into_iter()
                        .map(|(k, v)| (normalize(&k), normalize(&v)))
                        .collect();
                    p
                }
                Err(e) => {
                    tracing::warn!(error = %e, "trust priors: invalid json, using seed");
                    Self::default_seed()
                }
            },
            Err(_) => Self::default_seed(),
        }
    }

    pub fn prior_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.priors.get(canon) {
                return clamp01(w);
            }
        }

        if let Some(&w) = self.priors.get(&s) {
            return clamp01(w);
        }

        let padded = format!(" {s} ");
        let best = self
            .priors
            .iter()
            .filter(|(k, _)| padded.contains(&format!(" {k} ")))
            .max_by_key(|(k, _)| k.len());
        if let Some((_, &w)) = best {
            return clamp01(w);
        }

        clamp01(self.default_prior)
    }

    /// Wire services and publishers with strong editorial standards.
    pub fn default_seed() -> Self {
        let mut priors = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("reuters", 0.90),
            ("associated press", 0.90),
            ("bbc", 0.85),
            ("bloomberg", 0.85),
            ("npr", 0.82),
            ("financial times", 0.85),
            ("the guardian", 0.78),
            ("new york times", 0.80),
            ("washington post", 0.78),
            ("al jazeera", 0.72),
            ("nature", 0.92),
            ("science", 0.90),
            ("ars technica", 0.78),
            ("the verge", 0.70),
            ("techcrunch", 0.68),
        ] {
            priors.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("ap", "associated press"),
            ("ap news", "associated press"),
            ("apnews com", "associated press"),
            ("bbc news", "bbc"),
            ("bbc world", "bbc"),
            ("ft", "financial times"),
            ("nyt", "new york times"),
            ("nytimes", "new york times"),
            ("guardian", "the guardian"),
            ("wapo", "washington post"),
            ("reuters com", "reuters"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_prior: DEFAULT_TRUST,
            priors,
            aliases,
        }
    }
}

/// Lowercase, turn separators and punctuation into spaces, collapse runs.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\'', ':'], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return DEFAULT_TRUST;
    }
    x.clamp(0.0, 1.0)
}
