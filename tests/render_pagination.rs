// tests/render_pagination.rs
//
// Size-bounded pagination: every message within limits, no item split across
// messages, order preserved, long fields truncated with a visible marker.

use chrono::{Duration, TimeZone, Utc};
use newsrelay::model::ClassificationResult;
use newsrelay::render::{ContentStyle, RenderLimits, RenderOptions, Renderer, TRUNCATION_MARKER};
use newsrelay::{Item, ItemId};

fn items(n: usize, content_len: usize) -> Vec<Item> {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let link = format!("https://wire.test/{i:03}");
            Item {
                id: ItemId::derive(None, Some(&link), "t", ""),
                title: format!("Headline number {i:03}"),
                content: "x".repeat(content_len),
                link: Some(link),
                image: None,
                source: "Wire".into(),
                // newest first
                published: base - Duration::minutes(i as i64),
                fetched: base,
                category: Some("Technology".into()),
                citations: vec![],
                classification: Some(ClassificationResult {
                    topics: vec!["chips".into()],
                    ..Default::default()
                }),
                reliability: None,
                content_warning: None,
            }
        })
        .collect()
}

fn opts(style: ContentStyle) -> RenderOptions {
    RenderOptions {
        style,
        ..Default::default()
    }
}

#[test]
fn text_pages_respect_total_limit_and_keep_order() {
    let limits = RenderLimits {
        max_total_chars: 1000,
        max_text_chars: 1000,
        max_field_chars: 1024,
        max_blocks: 10,
    };
    let renderer = Renderer::new(limits);
    let input = items(20, 150);
    let style = opts(ContentStyle::Detailed);

    let one = renderer.render(&input[..1], &style);
    let block = one[0].char_len();
    let per_page = (1000 + 2) / (block + 2);
    assert!(per_page >= 1 && per_page < 10, "fixture should be char-bound, got {per_page}");

    let pages = renderer.render(&input, &style);
    assert_eq!(pages.len(), input.len().div_ceil(per_page));
    for p in &pages {
        assert!(p.char_len() <= 1000, "page has {} chars", p.char_len());
        assert!(p.embeds.is_empty());
    }

    let flattened: Vec<_> = pages.iter().flat_map(|p| p.item_ids.clone()).collect();
    let expected: Vec<_> = input.iter().map(|i| i.id.clone()).collect();
    assert_eq!(flattened, expected);
}

#[test]
fn every_style_paginates_the_same_way_on_block_count() {
    let renderer = Renderer::new(RenderLimits {
        max_text_chars: 6000,
        ..Default::default()
    });
    let input = items(25, 20);
    for style in [ContentStyle::Compact, ContentStyle::Detailed, ContentStyle::Embed] {
        let pages = renderer.render(&input, &opts(style));
        let sizes: Vec<_> = pages.iter().map(|p| p.item_count()).collect();
        assert_eq!(sizes, vec![10, 10, 5], "{style:?}");
    }
}

#[test]
fn plain_text_pages_stay_under_the_text_limit() {
    let renderer = Renderer::new(RenderLimits::default());
    let input = items(6, 600);
    let pages = renderer.render(&input, &RenderOptions::default());

    assert!(pages.len() > 1, "six long detailed blocks cannot share one message");
    for p in &pages {
        let body = p.content.as_deref().unwrap();
        assert!(body.chars().count() <= 2000, "page has {} chars", body.chars().count());
    }
    let flattened: Vec<_> = pages.iter().flat_map(|p| p.item_ids.clone()).collect();
    let expected: Vec<_> = input.iter().map(|i| i.id.clone()).collect();
    assert_eq!(flattened, expected);

    // embeds keep the larger budget
    let embeds = renderer.render(&input, &opts(ContentStyle::Embed));
    assert_eq!(embeds.len(), 1);
}

#[test]
fn embeds_carry_one_block_per_item() {
    let renderer = Renderer::new(RenderLimits::default());
    let input = items(3, 50);
    let pages = renderer.render(&input, &opts(ContentStyle::Embed));
    assert_eq!(pages.len(), 1);
    let e = &pages[0].embeds;
    assert_eq!(e.len(), 3);
    assert!(e[0].title.ends_with("Headline number 000"));
    assert_eq!(e[0].footer.as_deref(), Some("Wire • Technology"));
    assert!(e[0].fields.iter().any(|f| f.name == "Fact Check" && f.value.contains("pending")));
    assert!(pages[0].content.is_none());
}

#[test]
fn oversized_fields_are_truncated_with_marker() {
    let renderer = Renderer::new(RenderLimits::default());
    let input = items(1, 5000);

    let text = renderer.render(&input, &opts(ContentStyle::Detailed));
    let body = text[0].content.as_deref().unwrap();
    assert!(body.chars().count() <= 1024);

    let embed = renderer.render(&input, &opts(ContentStyle::Embed));
    let desc = &embed[0].embeds[0].description;
    assert_eq!(desc.chars().count(), 1024);
    assert!(desc.ends_with(TRUNCATION_MARKER));
}

#[test]
fn a_single_block_never_exceeds_one_message() {
    let limits = RenderLimits {
        max_total_chars: 300,
        max_text_chars: 300,
        max_field_chars: 1024,
        max_blocks: 10,
    };
    let renderer = Renderer::new(limits);
    let input = items(4, 2000);
    for style in [ContentStyle::Detailed, ContentStyle::Embed] {
        let pages = renderer.render(&input, &opts(style));
        assert_eq!(pages.len(), 4, "{style:?}");
        assert!(pages.iter().all(|p| p.char_len() <= 300 && p.item_count() == 1));
    }
}

#[test]
fn content_warning_is_prepended() {
    let renderer = Renderer::new(RenderLimits::default());
    let mut input = items(1, 10);
    input[0].content_warning = Some("⚠️ Content Warning: test".into());
    let text = renderer.render(&input, &opts(ContentStyle::Compact));
    assert!(text[0].content.as_deref().unwrap().starts_with("⚠️ Content Warning"));
    let embed = renderer.render(&input, &opts(ContentStyle::Embed));
    assert!(embed[0].embeds[0].description.starts_with("⚠️ Content Warning"));
}

#[test]
fn nothing_to_render_means_no_messages() {
    assert!(Renderer::default().render(&[], &RenderOptions::default()).is_empty());
}
