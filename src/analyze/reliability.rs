//! Reliability scoring: source trust prior, content heuristics and citation
//! quality folded into a running average, then bucketed into a tier.
//!
//! ```text
//! score = 0.5
//! score = (score + trust) / 2
//! score = (score + content) / 2
//! score = (score + citations) / 2   // only when the item cites links
//! ```
//!
//! Assessments are cached per canonical item URL for 24h.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{canonical_link, Item};

pub const NEUTRAL_SCORE: f64 = 0.5;
pub const HIGH_THRESHOLD: f64 = 0.8;
pub const MEDIUM_THRESHOLD: f64 = 0.5;
/// Citation quality reported for an item without citations.
pub const NO_CITATION_QUALITY: f64 = 0.3;
pub const CACHE_TTL_SECS: i64 = 24 * 60 * 60;
const MAX_CLAIMS: usize = 5;

const CLICKBAIT: &[&str] = &[
    "you won't believe",
    "shocking",
    "mind-blowing",
    "doctors hate",
    "this one weird trick",
    "secret they don't want you to know",
    "miracle cure",
    "instant results",
];

const EMOTIONAL: &[&str] = &[
    "must see",
    "warning",
    "alarming",
    "terrifying",
    "outrageous",
    "devastating",
    "life-changing",
    "revolutionary",
];

const BALANCED: &[&str] = &[
    "however",
    "on the other hand",
    "alternatively",
    "in contrast",
    "different perspective",
    "some argue",
    "others suggest",
    "contrary to",
];

const CLAIM_MARKERS: &[&str] = &[
    "according to",
    "researchers found",
    "studies show",
    "evidence suggests",
    "experts say",
    "research indicates",
    "data shows",
    "analysis reveals",
];

/// Suffix entries start with a dot; the rest match the host or any subdomain.
pub const RELIABLE_DOMAINS: &[&str] = &[
    ".edu",
    ".gov",
    "nature.com",
    "science.org",
    "reuters.com",
    "apnews.com",
    "ap.org",
    "bbc.com",
    "bbc.co.uk",
    "bloomberg.com",
];

static RE_EXCESS_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!{2,}|\?{2,}|\.{4,}").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReliabilityTier {
    High,
    Medium,
    Low,
}

impl ReliabilityTier {
    /// Pure and monotonic in `score`.
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_THRESHOLD {
            ReliabilityTier::High
        } else if score >= MEDIUM_THRESHOLD {
            ReliabilityTier::Medium
        } else {
            ReliabilityTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityTier::High => "High",
            ReliabilityTier::Medium => "Medium",
            ReliabilityTier::Low => "Low",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ReliabilityTier::High => "🟢",
            ReliabilityTier::Medium => "🟡",
            ReliabilityTier::Low => "🔴",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub rating: String,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityAssessment {
    pub score: f64,
    pub tier: ReliabilityTier,
    pub reasons: Vec<String>,
    pub claims: Vec<Claim>,
    pub assessed_at: DateTime<Utc>,
}

impl ReliabilityAssessment {
    pub fn from_score(score: f64, reasons: Vec<String>, now: DateTime<Utc>) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            NEUTRAL_SCORE
        };
        Self {
            score,
            tier: ReliabilityTier::from_score(score),
            reasons,
            claims: Vec::new(),
            assessed_at: now,
        }
    }

    /// e.g. `🟢 Reliability: High (0.8/1.0)`
    pub fn badge(&self) -> String {
        format!(
            "{} Reliability: {} ({:.1}/1.0)",
            self.tier.emoji(),
            self.tier.as_str(),
            self.score
        )
    }
}

/// Verdict for one extracted claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimVerdict {
    pub rating: String,
    pub evidence: String,
}

/// External claim verification. Swap in a real fact-check integration here.
#[async_trait]
pub trait ClaimVerifier: Send + Sync {
    async fn verify(&self, claim: &str) -> ClaimVerdict;
}

/// Null verifier: every claim stays unverified.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnverifiedClaims;

#[async_trait]
impl ClaimVerifier for UnverifiedClaims {
    async fn verify(&self, _claim: &str) -> ClaimVerdict {
        ClaimVerdict {
            rating: "Unverified".to_string(),
            evidence: "No verification data available".to_string(),
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Surface-pattern score starting at 0.5, clamped after every adjustment.
pub fn content_heuristic(text: &str) -> (f64, Vec<String>) {
    let lower = text.to_lowercase();
    let mut score = 0.5;
    let mut reasons = Vec::new();

    if CLICKBAIT.iter().any(|p| lower.contains(p)) {
        score = clamp01(score - 0.2);
        reasons.push("Contains clickbait patterns".to_string());
    }
    if EMOTIONAL.iter().any(|p| lower.contains(p)) {
        score = clamp01(score - 0.1);
        reasons.push("Contains emotional manipulation".to_string());
    }
    if BALANCED.iter().filter(|p| lower.contains(*p)).count() >= 2 {
        score = clamp01(score + 0.2);
        reasons.push("Shows balanced perspectives".to_string());
    }
    if RE_EXCESS_PUNCT.is_match(text) {
        score = clamp01(score - 0.1);
        reasons.push("Contains excessive punctuation".to_string());
    }

    (score, reasons)
}

pub fn is_reliable_citation(link: &str) -> bool {
    let host = match url::Url::parse(link.trim()) {
        Ok(u) => match u.host_str() {
            Some(h) => h.trim_end_matches('.').to_ascii_lowercase(),
            None => return false,
        },
        Err(_) => return false,
    };
    RELIABLE_DOMAINS.iter().any(|d| {
        if d.starts_with('.') {
            host.ends_with(d)
        } else {
            host == *d || host.ends_with(&format!(".{d}"))
        }
    })
}

/// Fraction of citations on the reliable allowlist, with a reason string.
pub fn citation_quality(citations: &[String]) -> (f64, &'static str) {
    if citations.is_empty() {
        return (NO_CITATION_QUALITY, "No citations provided");
    }
    let reliable = citations.iter().filter(|c| is_reliable_citation(c)).count();
    let q = reliable as f64 / citations.len() as f64;
    let reason = match reliable {
        n if n >= 3 => "Multiple reliable citations provided",
        n if n >= 1 => "At least one reliable citation provided",
        _ => "Limited reliable citations",
    };
    (q, reason)
}

/// Sentences carrying an epistemic marker.
pub fn extract_claims(text: &str) -> Vec<String> {
    text.split('.')
        .map(str::trim)
        .filter(|s| {
            let l = s.to_lowercase();
            CLAIM_MARKERS.iter().any(|m| l.contains(m))
        })
        .take(MAX_CLAIMS)
        .map(str::to_string)
        .collect()
}

/// Combine trust prior, content text and citations into a score.
pub fn score_item(trust: f64, text: &str, citations: &[String]) -> (f64, Vec<String>) {
    let mut reasons = Vec::new();
    let trust = if trust.is_finite() { clamp01(trust) } else { NEUTRAL_SCORE };

    let mut score = NEUTRAL_SCORE;
    score = clamp01((score + trust) / 2.0);
    if trust >= HIGH_THRESHOLD {
        reasons.push("Source is known to be reliable".to_string());
    } else if trust < MEDIUM_THRESHOLD {
        reasons.push("Source reliability is uncertain".to_string());
    }

    let (content, mut content_reasons) = content_heuristic(text);
    score = clamp01((score + content) / 2.0);
    reasons.append(&mut content_reasons);

    if !citations.is_empty() {
        let (q, reason) = citation_quality(citations);
        score = clamp01((score + q) / 2.0);
        reasons.push(reason.to_string());
    }

    (score, reasons)
}

pub struct ReliabilityScorer {
    ttl: Duration,
    cache: RwLock<HashMap<String, ReliabilityAssessment>>,
    verifier: Arc<dyn ClaimVerifier>,
}

impl Default for ReliabilityScorer {
    fn default() -> Self {
        Self::new(Arc::new(UnverifiedClaims))
    }
}

impl ReliabilityScorer {
    pub fn new(verifier: Arc<dyn ClaimVerifier>) -> Self {
        Self {
            ttl: Duration::seconds(CACHE_TTL_SECS),
            cache: RwLock::new(HashMap::new()),
            verifier,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn cached(&self, key: &str, now: DateTime<Utc>) -> Option<ReliabilityAssessment> {
        let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(key)
            .filter(|a| now.signed_duration_since(a.assessed_at) < self.ttl)
            .cloned()
    }

    /// Assess `item` given its source's trust prior. Never fails; cached per URL.
    pub async fn assess(&self, item: &Item, trust: f64, now: DateTime<Utc>) -> ReliabilityAssessment {
        let key = item.link.as_deref().map(canonical_link).filter(|k| !k.is_empty());
        if let Some(hit) = key.as_deref().and_then(|k| self.cached(k, now)) {
            return hit;
        }

        let text = format!("{}. {}", item.title, item.content);
        let (score, reasons) = score_item(trust, &text, &item.citations);
        let mut assessment = ReliabilityAssessment::from_score(score, reasons, now);

        for claim in extract_claims(&item.content) {
            let v = self.verifier.verify(&claim).await;
            assessment.claims.push(Claim {
                text: claim,
                rating: v.rating,
                evidence: v.evidence,
            });
        }

        if let Some(k) = key {
            let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            guard.retain(|_, a| now.signed_duration_since(a.assessed_at) < self.ttl);
            guard.insert(k, assessment.clone());
        }
        assessment
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(ReliabilityTier::from_score(0.80), ReliabilityTier::High);
        assert_eq!(ReliabilityTier::from_score(0.50), ReliabilityTier::Medium);
        assert_eq!(ReliabilityTier::from_score(0.499999), ReliabilityTier::Low);
        assert_eq!(ReliabilityTier::from_score(0.79999), ReliabilityTier::Medium);
    }

    #[test]
    fn heuristics_stack_and_clamp() {
        let (s, r) = content_heuristic("SHOCKING: you won't believe this terrifying news!!");
        assert!((s - 0.1).abs() < 1e-9, "got {s}");
        assert_eq!(r.len(), 3);

        let (s, _) = content_heuristic("Some argue yes. However, others suggest no.");
        assert!((s - 0.7).abs() < 1e-9);

        // a single contrastive marker is not enough
        let (s, _) = content_heuristic("However, the vote passed.");
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn citation_domains() {
        assert!(is_reliable_citation("https://www.reuters.com/world/x"));
        assert!(is_reliable_citation("https://cs.stanford.edu/paper"));
        assert!(is_reliable_citation("http://data.census.gov/"));
        assert!(!is_reliable_citation("https://notreuters.com/x"));
        assert!(!is_reliable_citation("not a url"));

        let cites = vec![
            "https://www.nature.com/a".to_string(),
            "https://blog.example/b".to_string(),
        ];
        let (q, _) = citation_quality(&cites);
        assert!((q - 0.5).abs() < 1e-9);
        assert!((citation_quality(&[]).0 - NO_CITATION_QUALITY).abs() < 1e-9);
    }

    #[test]
    fn running_average_order() {
        // 0.5 -> (0.5+0.9)/2 = 0.7 -> (0.7+0.5)/2 = 0.6
        let (s, _) = score_item(0.9, "Plain report.", &[]);
        assert!((s - 0.6).abs() < 1e-9);
        // with one reliable citation: (0.6+1.0)/2 = 0.8
        let (s, _) = score_item(0.9, "Plain report.", &["https://apnews.com/x".to_string()]);
        assert!((s - 0.8).abs() < 1e-9);
    }

    #[test]
    fn claims_are_sentences_with_markers() {
        let c = extract_claims("Prices rose. According to the bureau, inflation fell. Studies show more");
        assert_eq!(c, vec!["According to the bureau, inflation fell", "Studies show more"]);
    }
}
