//! Enrichment stage: classification, category inference, moderation gate and
//! reliability scoring for one item.
//!
//! Classification is an enrichment, not a gate: timeouts and service errors
//! leave the item unclassified. Moderation fails open. Only a High severity
//! verdict stops an item.

pub mod ai_adapter;
pub mod category;
pub mod moderation;
pub mod reliability;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::analyze::ai_adapter::{ClassifyRequest, DynClassifier};
use crate::analyze::moderation::{decide, ModerationAction, ModerationVerdict};
use crate::analyze::reliability::ReliabilityScorer;
use crate::model::{Item, Source};

pub use crate::analyze::ai_adapter::ClassifierClient;

#[derive(Debug, Clone)]
pub enum EnrichOutcome {
    Deliver(Item),
    /// High severity; never delivered.
    Dropped {
        item: Item,
        verdict: ModerationVerdict,
    },
}

#[derive(Clone)]
pub struct Enricher {
    classifier: DynClassifier,
    scorer: Arc<ReliabilityScorer>,
    timeout: Duration,
    excerpt_chars: usize,
    content_filtering: bool,
}

impl Enricher {
    pub fn new(classifier: DynClassifier, scorer: Arc<ReliabilityScorer>) -> Self {
        Self {
            classifier,
            scorer,
            timeout: Duration::from_secs(30),
            excerpt_chars: 1500,
            content_filtering: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_excerpt_chars(mut self, n: usize) -> Self {
        self.excerpt_chars = n.max(1);
        self
    }

    pub fn with_content_filtering(mut self, on: bool) -> Self {
        self.content_filtering = on;
        self
    }

    pub async fn enrich(&self, mut item: Item, source: &Source, now: DateTime<Utc>) -> EnrichOutcome {
        let req = ClassifyRequest::new(&source.name, &item.title, &item.content, self.excerpt_chars);

        match tokio::time::timeout(self.timeout, self.classifier.classify(&req)).await {
            Ok(Ok(result)) => item.classification = Some(result.sanitized()),
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, item = %item.id, provider = self.classifier.provider_name(), "classification skipped");
                counter!("classify_skipped_total").increment(1);
            }
            Err(_) => {
                tracing::warn!(item = %item.id, timeout_s = self.timeout.as_secs(), "classification timed out");
                counter!("classify_skipped_total").increment(1);
            }
        }

        if item.category.is_none() {
            item.category = Some(category::infer_category_or_general(item.topics()).to_string());
        }

        let verdict = if self.content_filtering {
            self.moderate(&item, &req).await
        } else {
            None
        };
        if let (Some(v), Some(c)) = (&verdict, item.classification.as_mut()) {
            c.moderation = Some(v.clone());
        }

        match decide(verdict.as_ref()) {
            ModerationAction::Drop => {
                let verdict = verdict.unwrap_or_default();
                tracing::warn!(
                    target: "moderation",
                    item = %item.id,
                    source = %item.source,
                    title = %item.title,
                    severity = verdict.severity.as_str(),
                    categories = ?verdict.flagged,
                    "{}",
                    verdict.explanation()
                );
                counter!("moderation_dropped_total").increment(1);
                return EnrichOutcome::Dropped { item, verdict };
            }
            ModerationAction::Warn(w) => {
                tracing::info!(target: "moderation", item = %item.id, "content warning attached");
                counter!("moderation_warned_total").increment(1);
                item.content_warning = Some(w);
            }
            ModerationAction::Allow => {}
        }

        item.reliability = Some(self.scorer.assess(&item, source.trust(), now).await);
        EnrichOutcome::Deliver(item)
    }

    async fn moderate(&self, item: &Item, req: &ClassifyRequest) -> Option<ModerationVerdict> {
        match tokio::time::timeout(self.timeout, self.classifier.moderate(req)).await {
            Ok(Ok(scores)) => Some(ModerationVerdict::from_scores(&scores)),
            Ok(Err(e)) => {
                tracing::warn!(target: "moderation", error = ?e, item = %item.id, "moderation failed; allowing content");
                None
            }
            Err(_) => {
                tracing::warn!(target: "moderation", item = %item.id, "moderation timed out; allowing content");
                None
            }
        }
    }
}
