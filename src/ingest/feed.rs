//! Syndication document parsing: RSS 2.0, RSS 1.0 (RDF) and Atom.
//!
//! The root element picks the dialect; each dialect deserializes with
//! quick-xml serde into its own shape and is mapped onto [`RawEntry`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::{Enclosure, RawEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Rdf,
    Atom,
}

#[derive(Debug, Deserialize, Default)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(t: Option<Text>) -> Option<String> {
    t.map(|t| t.value.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RDF puts items next to the channel instead of inside it.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize, Default)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<Text>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(rename = "dc:date")]
    dc_date: Option<Text>,
    #[serde(rename = "enclosure", default)]
    enclosures: Vec<EnclosureTag>,
    #[serde(rename = "media:content", default)]
    media: Vec<MediaTag>,
    #[serde(rename = "media:thumbnail", default)]
    thumbnails: Vec<MediaTag>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct EnclosureTag {
    #[serde(rename = "@url", default)]
    url: String,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaTag {
    #[serde(rename = "@url", default)]
    url: String,
    #[serde(rename = "@type")]
    mime: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
}

impl MediaTag {
    fn is_image(&self) -> bool {
        self.medium.as_deref() == Some("image")
            || self.mime.as_deref().is_some_and(|m| m.starts_with("image/"))
            || (self.medium.is_none() && self.mime.is_none())
    }
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<Text>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<Text>,
    updated: Option<Text>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
    #[serde(rename = "media:thumbnail", default)]
    thumbnails: Vec<MediaTag>,
    #[serde(rename = "media:content", default)]
    media: Vec<MediaTag>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term", default)]
    term: String,
    #[serde(rename = "@label")]
    label: Option<String>,
}

/// Identify the dialect from the document's root element.
pub fn detect_kind(xml: &str) -> Result<FeedKind> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading feed root")? {
            Event::Start(e) | Event::Empty(e) => {
                return match e.local_name().as_ref() {
                    b"rss" => Ok(FeedKind::Rss),
                    b"RDF" => Ok(FeedKind::Rdf),
                    b"feed" => Ok(FeedKind::Atom),
                    other => bail!(
                        "unsupported root element <{}>",
                        String::from_utf8_lossy(other)
                    ),
                }
            }
            Event::Eof => bail!("empty feed document"),
            _ => {}
        }
    }
}

/// Parse a feed document of any supported dialect.
pub fn parse_feed(raw: &str) -> Result<Vec<RawEntry>> {
    let xml = scrub_html_entities_for_xml(raw.trim_start_matches('\u{feff}').trim_start());
    let entries = match detect_kind(&xml)? {
        FeedKind::Rss => {
            let rss: Rss = quick_xml::de::from_str(&xml).context("parsing rss xml")?;
            rss.channel.items.into_iter().map(from_rss).collect()
        }
        FeedKind::Rdf => {
            let rdf: Rdf = quick_xml::de::from_str(&xml).context("parsing rdf xml")?;
            rdf.items.into_iter().map(from_rss).collect()
        }
        FeedKind::Atom => {
            let feed: AtomFeed = quick_xml::de::from_str(&xml).context("parsing atom xml")?;
            feed.entries.into_iter().map(from_atom).collect()
        }
    };
    Ok(entries)
}

fn from_rss(it: RssItem) -> RawEntry {
    let published_raw = text(it.pub_date).or_else(|| text(it.dc_date)).unwrap_or_default();
    let enclosures: Vec<Enclosure> = it
        .enclosures
        .into_iter()
        .filter(|e| !e.url.trim().is_empty())
        .map(|e| Enclosure {
            url: e.url.trim().to_string(),
            mime: e.mime,
        })
        .collect();
    let image = it
        .media
        .iter()
        .chain(it.thumbnails.iter())
        .find(|m| !m.url.trim().is_empty() && m.is_image())
        .map(|m| m.url.trim().to_string());

    RawEntry {
        guid: text(it.guid),
        title: text(it.title).unwrap_or_default(),
        link: text(it.link),
        description: text(it.description),
        content: text(it.content_encoded),
        published: parse_date(&published_raw),
        updated: None,
        published_raw,
        image,
        enclosures,
        categories: it.categories.into_iter().filter_map(|c| text(Some(c))).collect(),
    }
}

fn from_atom(e: AtomEntry) -> RawEntry {
    let link = e
        .links
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate" && !l.href.is_empty())
        .or_else(|| e.links.iter().find(|l| !l.href.is_empty()))
        .map(|l| l.href.trim().to_string());
    let enclosures = e
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure") && !l.href.is_empty())
        .map(|l| Enclosure {
            url: l.href.trim().to_string(),
            mime: l.mime.clone(),
        })
        .collect();
    let image = e
        .media
        .iter()
        .chain(e.thumbnails.iter())
        .find(|m| !m.url.trim().is_empty() && m.is_image())
        .map(|m| m.url.trim().to_string());

    let published_raw = text(e.published).unwrap_or_default();
    let updated = text(e.updated).and_then(|u| parse_date(&u));

    RawEntry {
        guid: text(e.id),
        title: text(e.title).unwrap_or_default(),
        link,
        description: text(e.summary),
        content: text(e.content),
        published: parse_date(&published_raw),
        updated,
        published_raw,
        image,
        enclosures,
        categories: e
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term).trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
    }
}

/// RFC 2822 (RSS), RFC 3339 (Atom / dc:date) and a few common deviations.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%a, %d %b %Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    // "Mon, 01 Jan 2024 10:00:00 UTC" style zone names chrono does not know
    let trimmed = s.rsplit_once(' ').map(|(head, _)| head).unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%a, %d %b %Y %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// HTML named entities are not valid XML; decode everything except the five
/// XML ones before handing the document to the parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    static RE_ENTITY: OnceCell<Regex> = OnceCell::new();
    let re = RE_ENTITY.get_or_init(|| {
        Regex::new(r"&([A-Za-z][A-Za-z0-9]{1,31});").expect("entity regex")
    });
    re.replace_all(s, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
            return caps[0].to_string();
        }
        let decoded = html_escape::decode_html_entities(&caps[0]).to_string();
        if decoded == caps[0] {
            // Unknown entity: escape the ampersand so the document still parses.
            format!("&amp;{name};")
        } else {
            decoded
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dialects() {
        assert_eq!(detect_kind("<?xml version=\"1.0\"?><rss version=\"2.0\"></rss>").unwrap(), FeedKind::Rss);
        assert_eq!(
            detect_kind("<feed xmlns=\"http://www.w3.org/2005/Atom\"></feed>").unwrap(),
            FeedKind::Atom
        );
        assert_eq!(
            detect_kind("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\"></rdf:RDF>").unwrap(),
            FeedKind::Rdf
        );
        assert!(detect_kind("<html></html>").is_err());
        assert!(detect_kind("").is_err());
    }

    #[test]
    fn html_entities_are_scrubbed() {
        let out = scrub_html_entities_for_xml("a&nbsp;b &amp; c&mdash;d &bogus;");
        assert_eq!(out, "a\u{a0}b &amp; c\u{2014}d &amp;bogus;");
    }

    #[test]
    fn dates_in_common_shapes() {
        let a = parse_date("Mon, 01 Jan 2024 10:00:00 GMT").unwrap();
        let b = parse_date("2024-01-01T10:00:00Z").unwrap();
        let c = parse_date("2024-01-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn rss_item_fields() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Wire</title>
    <item>
      <title>Chip &amp; fab news&nbsp;today</title>
      <link>https://wire.test/a</link>
      <guid isPermaLink="false">wire-1</guid>
      <description>&lt;p&gt;Short &lt;b&gt;summary&lt;/b&gt;&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Full body with <a href="https://www.reuters.com/x">source</a></p>]]></content:encoded>
      <pubDate>Tue, 02 Jan 2024 09:30:00 +0000</pubDate>
      <category>Tech</category>
      <enclosure url="https://wire.test/a.jpg" type="image/jpeg" length="10"/>
    </item>
  </channel>
</rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.guid.as_deref(), Some("wire-1"));
        assert_eq!(e.title, "Chip & fab news\u{a0}today");
        assert_eq!(e.link.as_deref(), Some("https://wire.test/a"));
        assert_eq!(e.description.as_deref(), Some("<p>Short <b>summary</b></p>"));
        assert!(e.content.as_deref().unwrap().contains("reuters.com"));
        assert_eq!(e.categories, vec!["Tech".to_string()]);
        assert!(e.enclosures[0].is_image());
        assert_eq!(e.published, parse_date("2024-01-02T09:30:00Z"));
    }

    #[test]
    fn atom_entry_fields() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Lab</title>
  <entry>
    <id>tag:lab.test,2024:1</id>
    <title type="html">Atom title</title>
    <link rel="self" href="https://lab.test/self/1"/>
    <link rel="alternate" type="text/html" href="https://lab.test/1"/>
    <updated>2024-02-01T08:00:00Z</updated>
    <summary>Summary text</summary>
    <category term="science" label="Science"/>
  </entry>
</feed>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.guid.as_deref(), Some("tag:lab.test,2024:1"));
        assert_eq!(e.link.as_deref(), Some("https://lab.test/1"));
        assert!(e.published.is_none());
        assert_eq!(e.sort_time(), parse_date("2024-02-01T08:00:00Z"));
        assert_eq!(e.categories, vec!["Science".to_string()]);
    }

    #[test]
    fn rdf_items_sit_beside_channel() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel><title>Old</title></channel>
  <item><title>One</title><link>https://old.test/1</link><dc:date>2024-03-01T00:00:00Z</dc:date></item>
  <item><title>Two</title><link>https://old.test/2</link></item>
</rdf:RDF>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].published, parse_date("2024-03-01T00:00:00Z"));
        assert!(entries[1].published.is_none());
    }

    #[test]
    fn malformed_documents_error() {
        assert!(parse_feed("<rss><channel><item><title>x</channel></rss>").is_err());
        assert!(parse_feed("not xml at all").is_err());
    }
}
