// tests/router_precedence.rs
//
// Destination selection: override first, default always, then every rule's
// filters (include beats exclude, category set, min trust, sentiment).

use chrono::Utc;
use newsrelay::model::{ClassificationResult, Sentiment};
use newsrelay::router::{DeliveryRouter, DeliveryRule, MinTrust};
use newsrelay::{Item, ItemId, Source};

fn item(source: &str, category: &str, sentiment: Option<Sentiment>) -> Item {
    Item {
        id: ItemId::derive(None, Some("https://techwire.test/1"), "t", ""),
        title: "Chip plant opens".into(),
        content: "body".into(),
        link: Some("https://techwire.test/1".into()),
        image: None,
        source: source.into(),
        published: Utc::now(),
        fetched: Utc::now(),
        category: Some(category.into()),
        citations: vec![],
        classification: sentiment.map(|s| ClassificationResult {
            sentiment: s,
            ..Default::default()
        }),
        reliability: None,
        content_warning: None,
    }
}

fn techwire() -> Source {
    Source::new("TechWire", "https://techwire.test/rss")
        .with_category("Technology")
        .with_trust(0.9)
}

fn rule(dest: &str) -> DeliveryRule {
    DeliveryRule::new(dest)
}

#[test]
fn scenario_a_default_plus_matching_rules() {
    let rules = vec![
        DeliveryRule { categories: vec!["Technology".into()], min_trust: MinTrust::Number(0.9), ..rule("tech") },
        DeliveryRule { categories: vec!["Technology".into()], min_trust: MinTrust::Number(0.95), ..rule("strict") },
        DeliveryRule { categories: vec!["Sports".into()], ..rule("sports") },
        rule("everything"),
    ];
    let router = DeliveryRouter::new("general", &rules);
    let dests = router.route(&item("TechWire", "Technology", None), &techwire());
    assert_eq!(dests, vec!["general", "tech", "everything"]);
}

#[test]
fn scenario_d_exclude_list_blocks_otherwise_matching_rule() {
    let rules = vec![DeliveryRule {
        categories: vec!["Technology".into()],
        exclude_sources: vec!["TechWire".into()],
        include_sources: vec![],
        ..rule("curated")
    }];
    let router = DeliveryRouter::new("general", &rules);
    let dests = router.route(&item("TechWire", "Technology", None), &techwire());
    assert_eq!(dests, vec!["general"]);
}

#[test]
fn include_list_beats_exclude_list() {
    let rules = vec![DeliveryRule {
        exclude_sources: vec!["techwire".into()],
        include_sources: vec!["TECHWIRE".into()],
        ..rule("curated")
    }];
    let router = DeliveryRouter::new("general", &rules);
    assert_eq!(
        router.route(&item("TechWire", "Technology", None), &techwire()),
        vec!["general", "curated"]
    );
}

#[test]
fn override_wins_even_with_no_rules_or_exclusion() {
    let src = techwire().with_override("tech-only");
    let it = item("TechWire", "Technology", None);

    assert_eq!(DeliveryRouter::new("general", &[]).route(&it, &src), vec!["tech-only"]);

    let rules = vec![DeliveryRule {
        exclude_sources: vec!["TechWire".into()],
        ..rule("tech-only")
    }];
    assert_eq!(DeliveryRouter::new("general", &rules).route(&it, &src), vec!["tech-only"]);
}

#[test]
fn min_trust_accepts_numbers_and_numeric_strings_only() {
    let it = item("TechWire", "Technology", None);
    let rules = vec![
        DeliveryRule { min_trust: MinTrust::Text("0.85".into()), ..rule("text-ok") },
        DeliveryRule { min_trust: MinTrust::Text("high".into()), ..rule("unparseable") },
        DeliveryRule { min_trust: MinTrust::Number(1.5), ..rule("out-of-range") },
        DeliveryRule { min_trust: MinTrust::Number(0.91), ..rule("too-strict") },
    ];
    assert_eq!(
        DeliveryRouter::new("general", &rules).route(&it, &techwire()),
        vec!["general", "text-ok"]
    );
}

#[test]
fn sentiment_filter_is_case_insensitive_and_unclassified_is_neutral() {
    let rules = vec![
        DeliveryRule { sentiment_filter: "Positive".into(), ..rule("good-news") },
        DeliveryRule { sentiment_filter: "NEUTRAL".into(), ..rule("neutral") },
        DeliveryRule { sentiment_filter: "ALL".into(), ..rule("all") },
    ];
    let router = DeliveryRouter::new("general", &rules);

    let positive = item("TechWire", "Technology", Some(Sentiment::Positive));
    assert_eq!(router.route(&positive, &techwire()), vec!["general", "good-news", "all"]);

    let unclassified = item("TechWire", "Technology", None);
    assert_eq!(router.route(&unclassified, &techwire()), vec!["general", "neutral", "all"]);
}

#[test]
fn destinations_are_deduplicated_in_order() {
    let rules = vec![rule("general"), rule("b"), rule("b"), rule("a")];
    let dests = DeliveryRouter::new("general", &rules).route(&item("TechWire", "Technology", None), &techwire());
    assert_eq!(dests, vec!["general", "b", "a"]);
}

#[test]
fn routing_is_deterministic() {
    let rules = vec![
        DeliveryRule { categories: vec!["technology".into()], ..rule("x") },
        DeliveryRule { exclude_sources: vec!["Other".into()], ..rule("y") },
    ];
    let router = DeliveryRouter::new("general", &rules);
    let it = item("TechWire", "Technology", Some(Sentiment::Negative));
    let first = router.route(&it, &techwire());
    for _ in 0..10 {
        assert_eq!(router.route(&it, &techwire()), first);
    }
}

#[test]
fn camel_case_rule_keys_are_accepted() {
    let json = r#"{
        "destination": "curated",
        "allowedCategories": ["Technology"],
        "excludeSources": ["TechWire"],
        "includeSources": [],
        "minTrust": "0.5",
        "sentimentFilter": "all",
        "maxItems": 3
    }"#;
    let r: DeliveryRule = serde_json::from_str(json).unwrap();
    assert_eq!(r.max_items, 3);
    assert_eq!(r.min_trust.threshold(), Some(0.5));
    assert!(!r.admits("TechWire", "Technology", 0.9, Sentiment::Neutral));
    assert!(r.admits("Other", "technology", 0.9, Sentiment::Neutral));
}
