// src/ingest/types.rs
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;

use crate::error::FetchErrorKind;
use crate::ingest::feed::parse_feed;
use crate::model::Source;

/// Responses above this size are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime: Option<String>,
}

impl Enclosure {
    pub fn is_image(&self) -> bool {
        self.mime
            .as_deref()
            .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// One entry as parsed from a feed document, before normalisation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEntry {
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Publish timestamp exactly as written in the feed (identity fallback).
    pub published_raw: String,
    pub image: Option<String>,
    pub enclosures: Vec<Enclosure>,
    pub categories: Vec<String>,
}

impl RawEntry {
    /// Time used for newest-first ordering.
    pub fn sort_time(&self) -> Option<DateTime<Utc>> {
        self.published.or(self.updated)
    }
}

/// Feed collaborator: fetch and parse one source's document.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>, FetchErrorKind>;
    fn name(&self) -> &'static str;
}

/// Plain HTTP GET with a descriptive user agent.
pub struct HttpFeedSource {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFeedSource {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            timeout,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }
}

fn map_reqwest(e: reqwest::Error, timeout_hint: Duration) -> FetchErrorKind {
    if e.is_timeout() {
        FetchErrorKind::Timeout(timeout_hint)
    } else if let Some(status) = e.status() {
        FetchErrorKind::Status(status.as_u16())
    } else {
        FetchErrorKind::Network(e.to_string())
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>, FetchErrorKind> {
        let hint = self.timeout;
        let resp = self
            .client
            .get(&source.url)
            .header(reqwest::header::ACCEPT, "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8")
            .send()
            .await
            .map_err(|e| map_reqwest(e, hint))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchErrorKind::Status(status.as_u16()));
        }
        if resp
            .content_length()
            .is_some_and(|n| n as usize > self.max_body_bytes)
        {
            return Err(FetchErrorKind::Parse("response body too large".into()));
        }

        let bytes = resp.bytes().await.map_err(|e| map_reqwest(e, hint))?;
        if bytes.len() > self.max_body_bytes {
            return Err(FetchErrorKind::Parse("response body too large".into()));
        }

        parse_document(&String::from_utf8_lossy(&bytes))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Parse a fetched document, recording `feed_parse_ms`.
pub fn parse_document(body: &str) -> Result<Vec<RawEntry>, FetchErrorKind> {
    let t0 = std::time::Instant::now();
    let parsed = parse_feed(body).map_err(|e| FetchErrorKind::Parse(format!("{e:#}")));
    histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    parsed
}

/// Scripted response for [`FixtureFeedSource`].
#[derive(Debug, Clone)]
pub enum Fixture {
    /// Raw feed document, parsed like an HTTP body.
    Document(String),
    Entries(Vec<RawEntry>),
    Fail(FetchErrorKind),
    /// Panics inside the fetch task.
    Panic(String),
    /// Sleeps, then behaves like the inner fixture.
    Slow(Duration, Box<Fixture>),
}

/// In-memory feed collaborator keyed by source name. Test helper and dry-run backend.
#[derive(Debug, Default)]
pub struct FixtureFeedSource {
    fixtures: RwLock<HashMap<String, Fixture>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FixtureFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source: &str, fixture: Fixture) -> Self {
        self.set(source, fixture);
        self
    }

    /// Replace a source's fixture between cycles.
    pub fn set(&self, source: &str, fixture: Fixture) {
        self.fixtures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), fixture);
    }

    pub fn fetch_count(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for FixtureFeedSource {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>, FetchErrorKind> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source.name.clone())
            .or_default() += 1;

        let mut fixture = self
            .fixtures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.name)
            .cloned()
            .ok_or_else(|| FetchErrorKind::Network(format!("no fixture for {}", source.name)))?;

        loop {
            match fixture {
                Fixture::Slow(d, inner) => {
                    tokio::time::sleep(d).await;
                    fixture = *inner;
                }
                Fixture::Document(doc) => return parse_document(&doc),
                Fixture::Entries(v) => return Ok(v),
                Fixture::Fail(kind) => return Err(kind),
                Fixture::Panic(msg) => panic!("{msg}"),
            }
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
