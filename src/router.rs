//! Destination selection for enriched items.
//!
//! Precedence:
//! 1. A source `destination_override` wins outright: exactly that destination.
//! 2. Otherwise the default destination is always included.
//! 3. Every other rule adds its destination only when all of its filters pass
//!    (exclude-list unless included, category set, minimum trust, sentiment).
//!
//! A rule whose threshold cannot be interpreted never matches.

use serde::{Deserialize, Serialize};

use crate::model::{Item, Sentiment, Source};
use crate::render::ContentStyle;

fn default_sentiment_filter() -> String {
    "all".to_string()
}
fn default_max_items() -> usize {
    10
}
fn default_true() -> bool {
    true
}

/// Minimum trust as written in config: a number, or a string that should hold one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinTrust {
    Number(f64),
    Text(String),
}

impl Default for MinTrust {
    fn default() -> Self {
        MinTrust::Number(0.0)
    }
}

impl MinTrust {
    /// `None` when the value is unparseable, NaN or outside 0..=1.
    pub fn threshold(&self) -> Option<f64> {
        let v = match self {
            MinTrust::Number(n) => *n,
            MinTrust::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        (v.is_finite() && (0.0..=1.0).contains(&v)).then_some(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRule {
    pub destination: String,
    /// Empty means every category.
    #[serde(default, alias = "allowedCategories")]
    pub categories: Vec<String>,
    #[serde(default, alias = "includeSources")]
    pub include_sources: Vec<String>,
    #[serde(default, alias = "excludeSources")]
    pub exclude_sources: Vec<String>,
    #[serde(default, alias = "minTrust")]
    pub min_trust: MinTrust,
    #[serde(default = "default_sentiment_filter", alias = "sentimentFilter")]
    pub sentiment_filter: String,
    #[serde(default = "default_max_items", alias = "maxItems")]
    pub max_items: usize,
    #[serde(default)]
    pub style: ContentStyle,
    #[serde(default = "default_true", alias = "includeSummary")]
    pub include_summary: bool,
    #[serde(default = "default_true", alias = "includeFactCheck")]
    pub include_fact_check: bool,
}

impl DeliveryRule {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            categories: Vec::new(),
            include_sources: Vec::new(),
            exclude_sources: Vec::new(),
            min_trust: MinTrust::default(),
            sentiment_filter: default_sentiment_filter(),
            max_items: default_max_items(),
            style: ContentStyle::default(),
            include_summary: true,
            include_fact_check: true,
        }
    }

    /// True when every filter of this rule admits the item.
    pub fn admits(&self, source: &str, category: &str, trust: f64, sentiment: Sentiment) -> bool {
        let included = contains_ci(&self.include_sources, source);
        if !included && contains_ci(&self.exclude_sources, source) {
            return false;
        }

        if !self.categories.is_empty() && !contains_ci(&self.categories, category) {
            return false;
        }

        match self.min_trust.threshold() {
            Some(min) if trust >= min => {}
            _ => return false,
        }

        let filter = self.sentiment_filter.trim();
        filter.is_empty()
            || filter.eq_ignore_ascii_case("all")
            || filter.eq_ignore_ascii_case(sentiment.as_str())
    }
}

fn contains_ci(list: &[String], needle: &str) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case(needle))
}

/// Evaluates the rule set for one cycle. Deterministic for a given config.
#[derive(Debug, Clone)]
pub struct DeliveryRouter<'a> {
    default_destination: &'a str,
    rules: &'a [DeliveryRule],
}

impl<'a> DeliveryRouter<'a> {
    pub fn new(default_destination: &'a str, rules: &'a [DeliveryRule]) -> Self {
        Self {
            default_destination,
            rules,
        }
    }

    /// Ordered, de-duplicated destinations for `item` from `source`.
    pub fn route(&self, item: &Item, source: &Source) -> Vec<String> {
        if let Some(dest) = source
            .destination_override
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            return vec![dest.to_string()];
        }

        let mut out = vec![self.default_destination.to_string()];
        let category = item.category_or_general();
        let trust = source.trust();
        let sentiment = item.sentiment();

        for rule in self.rules {
            if out.iter().any(|d| d == &rule.destination) {
                continue;
            }
            if rule.admits(&source.name, category, trust, sentiment) {
                out.push(rule.destination.clone());
            }
        }

        if cfg!(feature = "debug") {
            tracing::info!(item = %item.id, destinations = ?out, "routed");
        } else {
            tracing::debug!(item = %item.id, destinations = ?out, "routed");
        }
        out
    }
}
