//! Core records flowing through the pipeline: configured sources, ingested
//! items and the enrichment attached to them.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analyze::moderation::ModerationVerdict;
use crate::analyze::reliability::ReliabilityAssessment;

/// Category used when neither the source nor the classifier supplies one.
pub const GENERAL_CATEGORY: &str = "General";

/// Trust prior assumed when a source has none configured and no table entry matches.
pub const DEFAULT_TRUST: f64 = 0.5;

/// A configured feed endpoint. Runtime statistics live in
/// [`crate::health::HealthTracker`], keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    /// 0.0..=1.0; resolved from the trust-prior table at load when absent.
    #[serde(default)]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub bias: Option<String>,
    #[serde(default)]
    pub destination_override: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category: None,
            trust_score: None,
            bias: None,
            destination_override: None,
            paused: false,
            active: true,
            tags: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust_score = Some(trust);
        self
    }

    pub fn with_override(mut self, destination: impl Into<String>) -> Self {
        self.destination_override = Some(destination.into());
        self
    }

    /// Resolved trust prior, clamped to 0..=1.
    pub fn trust(&self) -> f64 {
        self.trust_score
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_TRUST)
            .clamp(0.0, 1.0)
    }

    /// Eligible for fetching this cycle.
    pub fn is_fetchable(&self) -> bool {
        self.active && !self.paused
    }
}

/// Stable item identity. The prefix records which natural key it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Derive an identity from the best available natural key:
    /// feed guid, else canonical link, else title + raw publish time.
    pub fn derive(guid: Option<&str>, link: Option<&str>, title: &str, published: &str) -> Self {
        if let Some(g) = guid.map(str::trim).filter(|g| !g.is_empty()) {
            return Self(format!("guid:{}", sha256_hex(g)));
        }
        if let Some(l) = link.map(canonical_link).filter(|l| !l.is_empty()) {
            return Self(format!("url:{}", sha256_hex(&l)));
        }
        let key = format!("{}|{}", title.trim(), published.trim());
        Self(format!("content:{}", sha256_hex(&key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and drop a trailing fragment so `#comments` links collapse onto the article.
pub fn canonical_link(link: &str) -> String {
    let l = link.trim();
    let l = l.split('#').next().unwrap_or(l);
    l.to_string()
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Lenient parse; anything unrecognised is neutral.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" => Sentiment::Positive,
            "negative" | "neg" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MAX_TOPICS: usize = 5;
pub const MAX_KEYWORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClassificationResult {
    pub sentiment: Sentiment,
    /// -1.0..=1.0
    pub score: f64,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
    /// Entity kind -> count.
    pub entities: BTreeMap<String, u32>,
    pub opinionated: bool,
    #[serde(default)]
    pub moderation: Option<ModerationVerdict>,
}

impl ClassificationResult {
    /// Enforce the documented bounds on service output.
    pub fn sanitized(mut self) -> Self {
        if !self.score.is_finite() {
            self.score = 0.0;
        }
        self.score = self.score.clamp(-1.0, 1.0);
        self.topics.retain(|t| !t.trim().is_empty());
        self.topics.truncate(MAX_TOPICS);
        self.keywords.retain(|k| !k.trim().is_empty());
        self.keywords.truncate(MAX_KEYWORDS);
        self
    }
}

/// One ingested article. Identity is fixed at creation; enrichment fills the
/// optional fields in place.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
    pub image: Option<String>,
    pub source: String,
    pub published: DateTime<Utc>,
    pub fetched: DateTime<Utc>,
    pub category: Option<String>,
    pub citations: Vec<String>,
    pub classification: Option<ClassificationResult>,
    pub reliability: Option<ReliabilityAssessment>,
    /// Visible annotation prepended when moderation severity is Medium.
    pub content_warning: Option<String>,
}

impl Item {
    /// Sentiment used for routing; unclassified items count as neutral.
    pub fn sentiment(&self) -> Sentiment {
        self.classification
            .as_ref()
            .map(|c| c.sentiment)
            .unwrap_or_default()
    }

    pub fn category_or_general(&self) -> &str {
        self.category.as_deref().unwrap_or(GENERAL_CATEGORY)
    }

    pub fn topics(&self) -> &[String] {
        self.classification
            .as_ref()
            .map(|c| c.topics.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_wins_over_link() {
        let a = ItemId::derive(Some("abc-1"), Some("https://x/a"), "T", "");
        let b = ItemId::derive(Some(" abc-1 "), Some("https://x/b"), "Other", "");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("guid:"));
    }

    #[test]
    fn link_then_content_fallback() {
        let a = ItemId::derive(None, Some("https://x/a#comments"), "T", "");
        let b = ItemId::derive(Some("  "), Some("https://x/a"), "T2", "");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("url:"));

        let c = ItemId::derive(None, None, "Title", "Mon, 01 Jan 2024 10:00:00 GMT");
        let d = ItemId::derive(None, Some(""), "Title", "Mon, 01 Jan 2024 10:00:00 GMT");
        assert_eq!(c, d);
        assert!(c.as_str().starts_with("content:"));
        assert_ne!(c, ItemId::derive(None, None, "Title", "Tue, 02 Jan 2024 10:00:00 GMT"));
    }

    #[test]
    fn sentiment_parse_is_lenient() {
        assert_eq!(Sentiment::parse("POSITIVE"), Sentiment::Positive);
        assert_eq!(Sentiment::parse(" negative "), Sentiment::Negative);
        assert_eq!(Sentiment::parse("mixed"), Sentiment::Neutral);
    }

    #[test]
    fn sanitized_caps_topics_and_score() {
        let c = ClassificationResult {
            score: 3.0,
            topics: (0..8).map(|i| format!("t{i}")).collect(),
            keywords: (0..14).map(|i| format!("k{i}")).collect(),
            ..Default::default()
        }
        .sanitized();
        assert_eq!(c.topics.len(), MAX_TOPICS);
        assert_eq!(c.keywords.len(), MAX_KEYWORDS);
        assert!((c.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trust_defaults_and_clamps() {
        let s = Source::new("A", "https://a");
        assert!((s.trust() - DEFAULT_TRUST).abs() < 1e-9);
        assert!((s.clone().with_trust(1.7).trust() - 1.0).abs() < 1e-9);
        assert!(!Source { paused: true, ..s }.is_fetchable());
    }
}
