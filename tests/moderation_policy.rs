// tests/moderation_policy.rs
//
// Severity mapping and the drop / warn / allow policy, both directly and
// through the enrichment stage.

use std::sync::Arc;

use chrono::Utc;
use newsrelay::ai_adapter::{BoxFut, BudgetedClient, ClassifyRequest, Provider, StaticClassifier};
use newsrelay::model::ClassificationResult;
use newsrelay::analyze::moderation::{decide, ModerationAction, ModerationScores, ModerationVerdict, Severity};
use newsrelay::analyze::reliability::ReliabilityScorer;
use newsrelay::analyze::{EnrichOutcome, Enricher};
use newsrelay::{Item, ItemId, Source};

fn verdict(pairs: &[(&str, f64)]) -> ModerationVerdict {
    let scores = pairs
        .iter()
        .fold(ModerationScores::default(), |s, (c, v)| s.with(c, *v));
    ModerationVerdict::from_scores(&scores)
}

#[test]
fn severity_table() {
    let cases = [
        (vec![("hate", 0.7)], Severity::High),
        (vec![("self-harm", 0.51)], Severity::High),
        (vec![("harassment", 0.9)], Severity::Medium),
        (vec![("harmful-content", 0.6)], Severity::Medium),
        (vec![("sexual", 0.6)], Severity::Medium),
        (vec![("violence", 0.6)], Severity::Medium),
        (vec![("spam", 0.9)], Severity::Low),
        (vec![("violence", 0.5)], Severity::None),
        (vec![], Severity::None),
    ];
    for (pairs, expected) in cases {
        assert_eq!(verdict(&pairs).severity, expected, "{pairs:?}");
    }
}

#[test]
fn high_is_sticky_regardless_of_other_categories() {
    let v = verdict(&[("violence", 0.99), ("sexual", 0.98), ("hate", 0.55)]);
    assert_eq!(v.severity, Severity::High);
    assert_eq!(decide(Some(&v)), ModerationAction::Drop);
}

#[test]
fn medium_warning_names_categories_and_top_confidence() {
    let v = verdict(&[("violence", 0.62), ("harassment", 0.81)]);
    match decide(Some(&v)) {
        ModerationAction::Warn(w) => {
            assert!(w.starts_with("⚠️ Content Warning"));
            assert!(w.contains("harassment, violence"));
            assert!(w.contains("81.0%"));
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[test]
fn low_none_and_missing_verdicts_allow() {
    assert_eq!(decide(Some(&verdict(&[("spam", 0.9)]))), ModerationAction::Allow);
    assert_eq!(decide(Some(&verdict(&[]))), ModerationAction::Allow);
    assert_eq!(decide(None), ModerationAction::Allow);
}

fn item(title: &str) -> Item {
    let link = format!("https://wire.test/{}", title.replace(' ', "-"));
    Item {
        id: ItemId::derive(None, Some(&link), title, ""),
        title: title.to_string(),
        content: format!("{title}. Full text."),
        link: Some(link),
        image: None,
        source: "Wire".into(),
        published: Utc::now(),
        fetched: Utc::now(),
        category: Some("World".into()),
        citations: vec![],
        classification: None,
        reliability: None,
        content_warning: None,
    }
}

#[tokio::test]
async fn enrichment_applies_the_policy() {
    let classifier = StaticClassifier::new()
        .moderate_when("riot", ModerationScores::default().with("hate", 0.7))
        .moderate_when("clash", ModerationScores::default().with("violence", 0.75));
    let enricher = Enricher::new(Arc::new(classifier), Arc::new(ReliabilityScorer::default()));
    let src = Source::new("Wire", "u").with_trust(0.8);

    let EnrichOutcome::Dropped { verdict, .. } = enricher.enrich(item("riot report"), &src, Utc::now()).await else {
        panic!("hate at 0.7 must be dropped");
    };
    assert_eq!(verdict.flagged, vec!["hate".to_string()]);

    let EnrichOutcome::Deliver(warned) = enricher.enrich(item("border clash"), &src, Utc::now()).await else {
        panic!("violence only warns");
    };
    assert!(warned.content_warning.as_deref().unwrap().contains("violence"));
    assert_eq!(warned.classification.unwrap().moderation.unwrap().severity, Severity::Medium);

    let EnrichOutcome::Deliver(plain) = enricher.enrich(item("weather"), &src, Utc::now()).await else {
        panic!("clean item delivers");
    };
    assert!(plain.content_warning.is_none());
    assert!(plain.reliability.is_some());
}

#[tokio::test]
async fn filtering_can_be_switched_off() {
    let classifier = StaticClassifier::new().moderate_when("riot", ModerationScores::default().with("hate", 0.9));
    let enricher = Enricher::new(Arc::new(classifier), Arc::new(ReliabilityScorer::default()))
        .with_content_filtering(false);
    let out = enricher.enrich(item("riot report"), &Source::new("Wire", "u"), Utc::now()).await;
    assert!(matches!(out, EnrichOutcome::Deliver(_)));
}

/// Flags anything mentioning "riot" as hate speech.
struct RiotFlagger;

impl Provider for RiotFlagger {
    fn classify<'a>(&'a self, _req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        Box::pin(async { Ok(ClassificationResult::default()) })
    }
    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        let hateful = req.content.contains("riot");
        Box::pin(async move {
            let scores = ModerationScores::default();
            Ok(if hateful { scores.with("hate", 0.9) } else { scores })
        })
    }
    fn name(&self) -> &'static str {
        "riot-flagger"
    }
}

#[tokio::test]
async fn hateful_items_are_dropped_after_the_budget_is_spent() {
    let client = Arc::new(BudgetedClient::new(RiotFlagger, 2));
    let enricher = Enricher::new(client.clone(), Arc::new(ReliabilityScorer::default()));
    let src = Source::new("Wire", "u");

    for n in 0..2 {
        let out = enricher.enrich(item(&format!("market note {n}")), &src, Utc::now()).await;
        assert!(matches!(out, EnrichOutcome::Deliver(_)));
    }
    assert_eq!(client.calls_today(), 2);

    for n in 0..3 {
        let out = enricher.enrich(item(&format!("riot report {n}")), &src, Utc::now()).await;
        let EnrichOutcome::Dropped { item, verdict } = out else {
            panic!("hate at 0.9 must be dropped with no budget left");
        };
        assert!(item.classification.is_none());
        assert_eq!(verdict.severity, Severity::High);
    }
    assert_eq!(client.calls_today(), 2);
}
