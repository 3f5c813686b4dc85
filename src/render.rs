//! Packs a destination's items into size-bounded messages.
//!
//! Each item becomes one block: a text segment for `compact`/`detailed`, or a
//! structured embed for `embed`. Blocks are clamped to the per-field limit
//! (with a visible marker) and then packed greedily in order: a new message
//! starts when adding the next block would exceed the block count or the
//! character budget. Text content is held to the smaller plain-message limit
//! (`max_text_chars`); embed pages use `max_total_chars`. Pagination never
//! looks at the style.

use serde::{Deserialize, Serialize};

use crate::model::{Item, Sentiment};
use crate::notify::{Embed, EmbedField, OutboundMessage};
use crate::router::DeliveryRule;

pub const TRUNCATION_MARKER: &str = "…";
const TEXT_SEPARATOR: &str = "\n\n";
const EMBED_TITLE_MAX: usize = 256;
const DETAILED_SUMMARY_MAX: usize = 400;
const FACT_CHECK_PENDING: &str = "🔄 Fact check pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStyle {
    Compact,
    #[default]
    Detailed,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    pub max_total_chars: usize,
    /// Cap on a message's plain `content`, separators included.
    pub max_text_chars: usize,
    pub max_field_chars: usize,
    pub max_blocks: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_total_chars: 6000,
            max_text_chars: 2000,
            max_field_chars: 1024,
            max_blocks: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub style: ContentStyle,
    pub include_summary: bool,
    pub include_fact_check: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            style: ContentStyle::Detailed,
            include_summary: true,
            include_fact_check: true,
        }
    }
}

impl From<&DeliveryRule> for RenderOptions {
    fn from(rule: &DeliveryRule) -> Self {
        Self {
            style: rule.style,
            include_summary: rule.include_summary,
            include_fact_check: rule.include_fact_check,
        }
    }
}

enum Block {
    Text(String),
    Embed(Embed),
}

impl Block {
    fn size(&self) -> usize {
        match self {
            Block::Text(t) => t.chars().count(),
            Block::Embed(e) => e.char_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    limits: RenderLimits,
}

impl Renderer {
    pub fn new(limits: RenderLimits) -> Self {
        Self { limits }
    }

    fn total_cap(&self) -> usize {
        self.limits.max_total_chars.max(1)
    }

    fn text_cap(&self) -> usize {
        self.limits.max_text_chars.max(1).min(self.total_cap())
    }

    fn field_cap(&self) -> usize {
        self.limits.max_field_chars.max(1).min(self.total_cap())
    }

    /// Render `items` (already newest-first) into one or more messages.
    pub fn render(&self, items: &[Item], opts: &RenderOptions) -> Vec<OutboundMessage> {
        let blocks = items.iter().map(|it| {
            let block = match opts.style {
                ContentStyle::Compact => Block::Text(self.clamp_text(compact_text(it))),
                ContentStyle::Detailed => Block::Text(self.clamp_text(detailed_text(it, opts))),
                ContentStyle::Embed => Block::Embed(self.clamp_embed(item_embed(it, opts))),
            };
            (it, block)
        });
        self.paginate(blocks)
    }

    fn paginate<'a>(&self, blocks: impl Iterator<Item = (&'a Item, Block)>) -> Vec<OutboundMessage> {
        let max_blocks = self.limits.max_blocks.max(1);
        let max_total = self.total_cap();
        let max_text = self.text_cap();
        let sep = TEXT_SEPARATOR.chars().count();

        let mut pages = Vec::new();
        let mut cur = OutboundMessage::default();
        let mut cur_size = 0usize;

        for (item, block) in blocks {
            let (extra, cap) = match &block {
                Block::Text(_) if !cur.item_ids.is_empty() => (sep, max_text),
                Block::Text(_) => (0, max_text),
                Block::Embed(_) => (0, max_total),
            };
            let size = block.size();
            if !cur.item_ids.is_empty()
                && (cur.item_ids.len() + 1 > max_blocks || cur_size + extra + size > cap)
            {
                pages.push(std::mem::take(&mut cur));
                cur_size = 0;
            }

            match block {
                Block::Text(t) => {
                    let content = cur.content.get_or_insert_with(String::new);
                    if !content.is_empty() {
                        content.push_str(TEXT_SEPARATOR);
                        cur_size += sep;
                    }
                    content.push_str(&t);
                }
                Block::Embed(e) => cur.embeds.push(e),
            }
            cur_size += size;
            cur.item_ids.push(item.id.clone());
        }

        if !cur.item_ids.is_empty() {
            pages.push(cur);
        }
        pages
    }

    fn clamp_text(&self, text: String) -> String {
        truncate_with_marker(&text, self.field_cap().min(self.text_cap()))
    }

    fn clamp_embed(&self, mut e: Embed) -> Embed {
        let field_cap = self.field_cap();
        e.title = truncate_with_marker(&e.title, EMBED_TITLE_MAX.min(field_cap));
        e.description = truncate_with_marker(&e.description, field_cap);
        for f in &mut e.fields {
            f.name = truncate_with_marker(&f.name, EMBED_TITLE_MAX.min(field_cap));
            f.value = truncate_with_marker(&f.value, field_cap);
        }
        if let Some(footer) = e.footer.as_mut() {
            *footer = truncate_with_marker(footer, field_cap);
        }

        // A single embed must still fit one message.
        let total = self.total_cap();
        while e.char_len() > total {
            let over = e.char_len() - total;
            let desc_len = e.description.chars().count();
            if desc_len > 0 {
                let keep = desc_len.saturating_sub(over);
                e.description = truncate_with_marker(&e.description, keep);
                if keep == 0 {
                    e.description.clear();
                }
            } else if e.fields.pop().is_some() {
                continue;
            } else if e.footer.take().is_some() {
                continue;
            } else {
                let keep = e.title.chars().count().saturating_sub(over);
                e.title = truncate_with_marker(&e.title, keep);
                break;
            }
        }
        e
    }
}

/// Cut `s` to at most `max` chars, ending in [`TRUNCATION_MARKER`] when cut.
pub fn truncate_with_marker(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max <= marker_len {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - marker_len).collect();
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push_str(TRUNCATION_MARKER);
    out
}

pub fn sentiment_emoji(s: Sentiment) -> &'static str {
    match s {
        Sentiment::Positive => "🟢",
        Sentiment::Negative => "🔴",
        Sentiment::Neutral => "🟡",
    }
}

pub fn category_emoji(category: &str) -> &'static str {
    match category.to_ascii_lowercase().as_str() {
        "technology" => "💻",
        "business" => "💼",
        "science" => "🔬",
        "health" => "🏥",
        "politics" => "🏛️",
        "sports" => "⚽",
        "world news" | "world" => "🌍",
        "entertainment" => "🎬",
        "environment" => "🌱",
        _ => "📰",
    }
}

pub fn category_color(category: &str) -> u32 {
    match category.to_ascii_lowercase().as_str() {
        "technology" => 0x7289DA,
        "business" => 0x43B581,
        "science" => 0xFAA61A,
        "health" => 0xF04747,
        "politics" => 0x747F8D,
        "sports" => 0x2ECC71,
        "world news" | "world" => 0x99AAB5,
        _ => 0x4B9CD3,
    }
}

fn sentiment_color(s: Sentiment) -> Option<u32> {
    match s {
        Sentiment::Positive => Some(0x43B581),
        Sentiment::Negative => Some(0xF04747),
        Sentiment::Neutral => None,
    }
}

fn summary_of(item: &Item) -> Option<&str> {
    let c = item.content.trim();
    (!c.is_empty() && c != item.title.trim()).then_some(c)
}

pub(crate) fn fact_check_line(item: &Item) -> String {
    item.reliability
        .as_ref()
        .map(|r| r.badge())
        .unwrap_or_else(|| FACT_CHECK_PENDING.to_string())
}

fn compact_text(item: &Item) -> String {
    let mut out = String::new();
    if let Some(w) = &item.content_warning {
        out.push_str(w);
        out.push('\n');
    }
    out.push_str(&format!(
        "{} **{}** [{}] | {}",
        category_emoji(item.category_or_general()),
        item.source,
        item.category_or_general(),
        item.title
    ));
    if let Some(link) = &item.link {
        out.push_str(&format!("\n🔗 {link}"));
    }
    out
}

fn detailed_text(item: &Item, opts: &RenderOptions) -> String {
    let mut out = String::new();
    if let Some(w) = &item.content_warning {
        out.push_str(w);
        out.push('\n');
    }
    out.push_str(&format!(
        "📰 **{} [{}]**\n## {}\n",
        item.source,
        item.category_or_general(),
        item.title
    ));
    if let Some(link) = &item.link {
        out.push_str(&format!("🔗 {link}\n"));
    }
    if opts.include_summary {
        if let Some(summary) = summary_of(item) {
            out.push_str("**Summary:** ");
            out.push_str(&truncate_with_marker(summary, DETAILED_SUMMARY_MAX));
            out.push('\n');
        }
    }
    if let Some(c) = &item.classification {
        out.push_str(&format!(
            "{} **Sentiment:** {} ({:+.1})\n",
            sentiment_emoji(c.sentiment),
            c.sentiment,
            c.score
        ));
        if !c.topics.is_empty() {
            out.push_str(&format!("🏷️ **Topics:** {}\n", c.topics.join(", ")));
        }
    }
    if opts.include_fact_check {
        out.push_str(&fact_check_line(item));
        out.push('\n');
    }
    out.push_str(&format!("📅 Published <t:{}:R>", item.published.timestamp()));
    out
}

fn item_embed(item: &Item, opts: &RenderOptions) -> Embed {
    let category = item.category_or_general();
    let mut description = String::new();
    if let Some(w) = &item.content_warning {
        description.push_str(w);
    }
    if opts.include_summary {
        if let Some(summary) = summary_of(item) {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str(summary);
        }
    }

    let mut fields = Vec::new();
    if let Some(c) = &item.classification {
        if !c.topics.is_empty() {
            fields.push(EmbedField {
                name: "Topics".into(),
                value: c.topics.join(", "),
                inline: true,
            });
        }
        fields.push(EmbedField {
            name: "Sentiment".into(),
            value: format!("{} {} ({:+.1})", sentiment_emoji(c.sentiment), c.sentiment, c.score),
            inline: true,
        });
    }
    if opts.include_fact_check {
        fields.push(EmbedField {
            name: "Fact Check".into(),
            value: fact_check_line(item),
            inline: false,
        });
    }

    Embed {
        title: format!("{} {}", category_emoji(category), item.title),
        url: item.link.clone(),
        description,
        color: sentiment_color(item.sentiment()).unwrap_or_else(|| category_color(category)),
        fields,
        footer: Some(format!("{} • {}", item.source, category)),
        thumbnail: item.image.clone(),
        timestamp: Some(item.published.to_rfc3339()),
    }
}
