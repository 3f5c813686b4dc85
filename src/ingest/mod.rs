// src/ingest/mod.rs
pub mod feed;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use tokio::sync::{watch, Semaphore};

use crate::error::FetchErrorKind;
use crate::ingest::types::{FeedSource, RawEntry};
use crate::model::{canonical_link, Item, ItemId, Source};

static RE_SCRIPT: OnceCell<Regex> = OnceCell::new();
static RE_TAGS: OnceCell<Regex> = OnceCell::new();
static RE_WS: OnceCell<Regex> = OnceCell::new();
static RE_IMG: OnceCell<Regex> = OnceCell::new();
static RE_HREF: OnceCell<Regex> = OnceCell::new();
static RE_BARE_URL: OnceCell<Regex> = OnceCell::new();

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Normalize markup into plain text: decode entities, drop script/style
/// blocks and tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // Decode first so escaped markup (`&lt;p&gt;`) is stripped too.
    let mut out = html_escape::decode_html_entities(s).to_string();
    out = re(&RE_SCRIPT, r"(?is)<(script|style)\b.*?</(script|style)>")
        .replace_all(&out, " ")
        .to_string();
    out = re(&RE_TAGS, r"(?is)</?[a-z!][^>]*>")
        .replace_all(&out, " ")
        .to_string();
    out = html_escape::decode_html_entities(&out).to_string();
    re(&RE_WS, r"\s+").replace_all(&out, " ").trim().to_string()
}

/// Entry image, then image enclosures, then the first `<img src>` in the markup.
pub fn extract_image(entry: &RawEntry) -> Option<String> {
    if let Some(img) = entry.image.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(img.trim().to_string());
    }
    if let Some(enc) = entry.enclosures.iter().find(|e| e.is_image()) {
        return Some(enc.url.clone());
    }
    let img_re = re(&RE_IMG, r#"(?i)<img\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#);
    [entry.content.as_deref(), entry.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|html| img_re.captures(html).map(|c| c[1].trim().to_string()))
}

/// Absolute links referenced by the entry, first-seen order, without the
/// entry's own link and without image enclosures.
pub fn extract_citations(entry: &RawEntry) -> Vec<String> {
    let own = entry.link.as_deref().map(canonical_link);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |url: &str| {
        let url = url.trim().trim_end_matches(['.', ',', ')', ';']);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return;
        }
        let canon = canonical_link(url);
        if own.as_deref() == Some(canon.as_str()) {
            return;
        }
        if seen.insert(canon) {
            out.push(url.to_string());
        }
    };

    let href = re(&RE_HREF, r#"(?i)\bhref\s*=\s*["']([^"']+)["']"#);
    let bare = re(&RE_BARE_URL, r#"https?://[^\s"'<>]+"#);
    for html in [entry.content.as_deref(), entry.description.as_deref()]
        .into_iter()
        .flatten()
    {
        let decoded = html_escape::decode_html_entities(html);
        for c in href.captures_iter(&decoded) {
            push(&c[1]);
        }
        for m in bare.find_iter(&decoded) {
            push(m.as_str());
        }
    }
    for enc in entry.enclosures.iter().filter(|e| !e.is_image()) {
        push(&enc.url);
    }
    out
}

/// Turn a parsed entry into an [`Item`]. Entries with neither title nor link
/// nor body carry nothing to deliver and are skipped.
pub fn build_item(source: &Source, entry: RawEntry, fetched_at: DateTime<Utc>) -> Option<Item> {
    let title = normalize_text(&entry.title);
    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);
    let content = [entry.content.as_deref(), entry.description.as_deref()]
        .into_iter()
        .flatten()
        .map(normalize_text)
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| title.clone());
    if title.is_empty() && link.is_none() && content.is_empty() {
        return None;
    }

    let id = ItemId::derive(
        entry.guid.as_deref(),
        link.as_deref(),
        &title,
        &entry.published_raw,
    );
    let image = extract_image(&entry);
    let citations = extract_citations(&entry);

    Some(Item {
        id,
        title,
        content,
        link,
        image,
        source: source.name.clone(),
        published: entry.sort_time().unwrap_or(fetched_at),
        fetched: fetched_at,
        category: source.category.clone(),
        citations,
        classification: None,
        reliability: None,
        content_warning: None,
    })
}

/// Newest first, then keep at most `cap`. Undated entries sort last.
pub fn sort_and_cap(mut entries: Vec<RawEntry>, cap: usize) -> Vec<RawEntry> {
    entries.sort_by(|a, b| b.sort_time().cmp(&a.sort_time()));
    entries.truncate(cap);
    entries
}

/// Result of fetching one source.
#[derive(Debug)]
pub struct FetchOutcome {
    pub source: Source,
    pub result: Result<Vec<RawEntry>, FetchErrorKind>,
    pub elapsed: Duration,
}

/// Bounded-concurrency fetcher. Each source runs in its own task under its
/// own timeout; a failing or panicking task only affects its own outcome.
#[derive(Clone)]
pub struct Fetcher {
    feed: Arc<dyn FeedSource>,
    concurrency: usize,
    timeout: Duration,
    max_items: usize,
}

impl Fetcher {
    pub fn new(feed: Arc<dyn FeedSource>) -> Self {
        Self {
            feed,
            concurrency: 5,
            timeout: Duration::from_secs(30),
            max_items: 5,
        }
    }

    pub fn with_concurrency(mut self, k: usize) -> Self {
        self.concurrency = k.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_items(mut self, cap: usize) -> Self {
        self.max_items = cap;
        self
    }

    /// Fetch every given source. Outcomes come back in input order.
    pub async fn fetch_all(&self, sources: &[Source], cancel: watch::Receiver<bool>) -> Vec<FetchOutcome> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(sources.len());

        for source in sources.iter().cloned() {
            let sem = sem.clone();
            let feed = self.feed.clone();
            let timeout = self.timeout;
            let cap = self.max_items;
            let mut cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (Err(FetchErrorKind::Cancelled), Duration::ZERO),
                };
                if *cancel.borrow() {
                    return (Err(FetchErrorKind::Cancelled), Duration::ZERO);
                }
                let t0 = Instant::now();
                let result = tokio::select! {
                    r = tokio::time::timeout(timeout, feed.fetch(&source)) => match r {
                        Ok(Ok(entries)) => Ok(sort_and_cap(entries, cap)),
                        Ok(Err(kind)) => Err(kind),
                        Err(_) => Err(FetchErrorKind::Timeout(timeout)),
                    },
                    _ = cancelled(&mut cancel) => Err(FetchErrorKind::Cancelled),
                };
                (result, t0.elapsed())
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (source, handle) in sources.iter().zip(handles) {
            let (result, elapsed) = match handle.await {
                Ok(done) => done,
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    tracing::error!(source = %source.name, panic = %msg, "fetch task panicked");
                    (Err(FetchErrorKind::Panicked(msg)), Duration::ZERO)
                }
                Err(_) => (Err(FetchErrorKind::Cancelled), Duration::ZERO),
            };

            counter!("fetch_total").increment(1);
            histogram!("fetch_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
            match &result {
                Ok(entries) => {
                    tracing::debug!(source = %source.name, entries = entries.len(), elapsed_ms = elapsed.as_millis() as u64, "fetched")
                }
                Err(kind) => {
                    counter!("fetch_errors_total").increment(1);
                    tracing::warn!(source = %source.name, feed = self.feed.name(), error = %kind, "fetch failed");
                }
            }
            outcomes.push(FetchOutcome {
                source: source.clone(),
                result,
                elapsed,
            });
        }
        outcomes
    }
}

/// Resolves once the cycle is cancelled; never resolves if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
