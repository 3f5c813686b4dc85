//! Periodic digest of delivered items, grouped by category.
//!
//! Built from history records: one summary embed with a per-category count,
//! then one embed per category listing its newest items.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::notify::{Embed, EmbedField, OutboundMessage};
use crate::render::{category_color, category_emoji, fact_check_line, truncate_with_marker, RenderLimits};
use crate::store::ItemRecord;

const SUMMARY_TITLE: &str = "📰 News Digest Summary";
const SUMMARY_COLOR: u32 = 0x7289DA;
const ITEMS_PER_CATEGORY: usize = 10;
const FIELD_NAME_MAX: usize = 256;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

#[derive(Debug, Clone, Default)]
pub struct Digest {
    pub embeds: Vec<Embed>,
    pub total: usize,
    /// Category → item count, in name order.
    pub categories: BTreeMap<String, usize>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Pack the embeds into messages under the block and character limits.
    pub fn messages(&self, limits: &RenderLimits) -> Vec<OutboundMessage> {
        let max_blocks = limits.max_blocks.max(1);
        let max_total = limits.max_total_chars.max(1);
        let mut pages = Vec::new();
        let mut cur = OutboundMessage::default();
        let mut cur_size = 0usize;
        for embed in &self.embeds {
            let size = embed.char_len();
            if !cur.embeds.is_empty() && (cur.embeds.len() + 1 > max_blocks || cur_size + size > max_total) {
                pages.push(std::mem::take(&mut cur));
                cur_size = 0;
            }
            cur_size += size;
            cur.embeds.push(embed.clone());
        }
        if !cur.embeds.is_empty() {
            pages.push(cur);
        }
        pages
    }
}

/// Digest of the records published strictly between `start` and `end`.
pub fn build_digest(records: &[ItemRecord], start: DateTime<Utc>, end: DateTime<Utc>, limits: &RenderLimits) -> Digest {
    let mut by_category: BTreeMap<&str, Vec<&ItemRecord>> = BTreeMap::new();
    for r in records
        .iter()
        .filter(|r| r.item.published > start && r.item.published < end)
    {
        by_category.entry(r.item.category_or_general()).or_default().push(r);
    }
    if by_category.is_empty() {
        return Digest::default();
    }

    let field_cap = limits.max_field_chars.max(1);
    let categories: BTreeMap<String, usize> = by_category
        .iter()
        .map(|(c, rs)| (c.to_string(), rs.len()))
        .collect();

    let mut embeds = vec![Embed {
        title: SUMMARY_TITLE.to_string(),
        description: format!("News from {} to {}", start.format(TIME_FORMAT), end.format(TIME_FORMAT)),
        color: SUMMARY_COLOR,
        fields: categories
            .iter()
            .map(|(c, n)| EmbedField {
                name: format!("{} {}", category_emoji(c), c),
                value: format!("{n} articles"),
                inline: true,
            })
            .collect(),
        timestamp: Some(end.to_rfc3339()),
        ..Default::default()
    }];

    for (category, mut rs) in by_category {
        rs.sort_by(|a, b| b.item.published.cmp(&a.item.published));
        let fields = rs
            .iter()
            .take(ITEMS_PER_CATEGORY)
            .map(|r| {
                let mut value = format!("Source: {}", r.item.source);
                if let Some(link) = &r.item.link {
                    value.push('\n');
                    value.push_str(link);
                }
                value.push('\n');
                value.push_str(&fact_check_line(&r.item));
                EmbedField {
                    name: truncate_with_marker(&r.item.title, FIELD_NAME_MAX.min(field_cap)),
                    value: truncate_with_marker(&value, field_cap),
                    inline: false,
                }
            })
            .collect();
        let footer = (rs.len() > ITEMS_PER_CATEGORY)
            .then(|| format!("And {} more articles...", rs.len() - ITEMS_PER_CATEGORY));
        embeds.push(Embed {
            title: format!("{} {} News", category_emoji(category), category),
            color: category_color(category),
            fields,
            footer,
            ..Default::default()
        });
    }

    let total = categories.values().sum();
    tracing::debug!(total, categories = categories.len(), "digest built");
    Digest {
        embeds,
        total,
        categories,
    }
}
