//! Moderation verdicts and the drop / warn / allow policy.
//!
//! A category counts as triggered when its confidence is above
//! [`FLAG_THRESHOLD`]. Hate and self-harm are High; harassment, harmful
//! content, sexual content and violence are Medium; any other triggered
//! category is Low. Overall severity is the maximum over triggered categories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const FLAG_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// One category as reported by the moderation service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CategoryScore {
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub confidence: f64,
}

/// Raw moderation response: category name → flag + confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModerationScores {
    pub categories: BTreeMap<String, CategoryScore>,
}

impl ModerationScores {
    pub fn with(mut self, category: &str, confidence: f64) -> Self {
        self.categories.insert(
            category.to_string(),
            CategoryScore {
                flagged: confidence > FLAG_THRESHOLD,
                confidence,
            },
        );
        self
    }
}

/// Severity tier for a single category name. Accepts `self_harm`,
/// `self-harm/intent`, `Hate Speech` and similar spellings.
pub fn category_severity(name: &str) -> Severity {
    let n = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    let head = n.split('/').next().unwrap_or(&n);
    if head.starts_with("hate") || head.starts_with("self-harm") {
        return Severity::High;
    }
    match head {
        "harassment" | "harmful-content" | "harmful" | "sexual" | "sexual-content" | "violence" => {
            Severity::Medium
        }
        _ => Severity::Low,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModerationVerdict {
    /// Triggered categories, highest confidence first.
    pub flagged: Vec<String>,
    pub severity: Severity,
    pub top_confidence: f64,
}

impl ModerationVerdict {
    pub fn from_scores(scores: &ModerationScores) -> Self {
        let mut triggered: Vec<(&String, f64)> = scores
            .categories
            .iter()
            .filter(|(_, s)| s.confidence.is_finite() && s.confidence > FLAG_THRESHOLD)
            .map(|(k, s)| (k, s.confidence))
            .collect();
        triggered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let severity = triggered
            .iter()
            .map(|(k, _)| category_severity(k))
            .max()
            .unwrap_or(Severity::None);

        Self {
            top_confidence: triggered.first().map(|(_, c)| *c).unwrap_or(0.0),
            flagged: triggered.into_iter().map(|(k, _)| k.clone()).collect(),
            severity,
        }
    }

    pub fn explanation(&self) -> String {
        format!(
            "Content flagged for: {} (confidence: {:.1}%)",
            self.flagged.join(", "),
            self.top_confidence * 100.0
        )
    }

    pub fn warning(&self) -> String {
        format!(
            "⚠️ Content Warning: This article may contain sensitive material ({})",
            self.explanation()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationAction {
    Allow,
    /// Deliver with this annotation prepended.
    Warn(String),
    Drop,
}

/// Policy over an optional verdict; no verdict (service failure) allows.
pub fn decide(verdict: Option<&ModerationVerdict>) -> ModerationAction {
    match verdict.map(|v| (v.severity, v)) {
        Some((Severity::High, _)) => ModerationAction::Drop,
        Some((Severity::Medium, v)) => ModerationAction::Warn(v.warning()),
        _ => ModerationAction::Allow,
    }
}
