//! # Orchestrator
//! Drives one fetch → classify → route → render → deliver cycle.
//!
//! All shared state lives in [`PipelineContext`]; components never call back
//! into the orchestrator. Failures are collected per source / destination and
//! the cycle always returns to `Idle`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::analyze::ai_adapter::{build_client_from_config, DynClassifier};
use crate::analyze::moderation::Severity;
use crate::analyze::reliability::ReliabilityScorer;
use crate::analyze::{EnrichOutcome, Enricher};
use crate::config::PipelineConfig;
use crate::dedup::DedupStore;
use crate::digest::build_digest;
use crate::error::{CycleErrors, FetchErrorKind, PipelineError};
use crate::health::HealthTracker;
use crate::ingest::types::{FeedSource, HttpFeedSource};
use crate::ingest::{build_item, cancelled, Fetcher};
use crate::metrics::ensure_metrics_described;
use crate::model::{Item, ItemId, Source};
use crate::notify::discord::DiscordMessenger;
use crate::notify::pacing::Pacer;
use crate::notify::{LogMessenger, Messenger, OutboundMessage};
use crate::render::{RenderOptions, Renderer};
use crate::router::DeliveryRouter;
use crate::store::{HistoryStore, InMemoryHistory, ItemRecord, SourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Fetching,
    Classifying,
    Routing,
    Rendering,
    Delivering,
    Paused,
}

/// Collaborators and cross-cycle state, built once and shared by every cycle.
#[derive(Clone)]
pub struct PipelineContext {
    pub dedup: Arc<DedupStore>,
    pub health: Arc<HealthTracker>,
    pub feed: Arc<dyn FeedSource>,
    pub classifier: DynClassifier,
    pub scorer: Arc<ReliabilityScorer>,
    pub messenger: Arc<dyn Messenger>,
    pub store: Arc<dyn HistoryStore>,
}

impl PipelineContext {
    pub fn new(feed: Arc<dyn FeedSource>, classifier: DynClassifier, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            dedup: Arc::new(DedupStore::default()),
            health: Arc::new(HealthTracker::new()),
            feed,
            classifier,
            scorer: Arc::new(ReliabilityScorer::default()),
            messenger,
            store: Arc::new(InMemoryHistory::default()),
        }
    }

    /// Production wiring: HTTP feeds, configured classifier, webhook messenger
    /// when webhooks exist (log-only otherwise).
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let s = &config.settings;
        let feed = Arc::new(HttpFeedSource::new(&s.user_agent, s.fetch_timeout())?);
        let classifier = build_client_from_config(&config.ai.clone().resolve()?);
        let messenger: Arc<dyn Messenger> = if config.webhooks.is_empty() {
            tracing::warn!("no webhooks configured; messages will only be logged");
            Arc::new(LogMessenger)
        } else {
            let discord = DiscordMessenger::new(config.webhooks.clone());
            let destinations = std::iter::once(s.default_destination.as_str())
                .chain(config.rules.iter().map(|r| r.destination.as_str()));
            for dest in destinations.filter(|d| !discord.knows(d)) {
                tracing::warn!(destination = dest, "no webhook for destination; its messages will fail");
            }
            Arc::new(discord)
        };
        Ok(Self::new(feed, classifier, messenger)
            .with_dedup(DedupStore::new(chrono::Duration::seconds(s.dedup_ttl_secs.max(1)))))
    }

    pub fn with_dedup(mut self, dedup: DedupStore) -> Self {
        self.dedup = Arc::new(dedup);
        self
    }

    pub fn with_scorer(mut self, scorer: ReliabilityScorer) -> Self {
        self.scorer = Arc::new(scorer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = store;
        self
    }
}

/// A High severity drop, kept for the cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationEvent {
    pub item: ItemId,
    pub source: String,
    pub title: String,
    pub severity: Severity,
    pub categories: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub destination: String,
    pub messages_sent: usize,
    pub messages_failed: usize,
    /// One entry per failed message: the messenger's error text.
    pub failures: Vec<String>,
    pub items: Vec<ItemId>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    /// States entered, in order, ending with `Idle`.
    pub transitions: Vec<CycleState>,
    pub sources_fetched: usize,
    pub entries_fetched: usize,
    pub items_new: usize,
    pub items_duplicate: usize,
    pub items_warned: usize,
    pub moderation_events: Vec<ModerationEvent>,
    pub deliveries: Vec<DeliveryReport>,
    pub errors: CycleErrors,
    pub paused: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CycleReport {
    /// Item ids delivered to `destination`, in send order.
    pub fn delivered_to(&self, destination: &str) -> Vec<ItemId> {
        self.deliveries
            .iter()
            .filter(|d| d.destination == destination)
            .flat_map(|d| d.items.iter().cloned())
            .collect()
    }

    pub fn total_delivered(&self) -> usize {
        self.deliveries.iter().map(|d| d.items.len()).sum()
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
    paused: AtomicBool,
    paused_sources: RwLock<HashSet<String>>,
    state: RwLock<CycleState>,
    running: Mutex<()>,
    cancel: watch::Sender<bool>,
    pacer: Arc<Pacer>,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            paused: AtomicBool::new(false),
            paused_sources: RwLock::new(HashSet::new()),
            state: RwLock::new(CycleState::Idle),
            running: Mutex::new(()),
            cancel: watch::channel(false).0,
            pacer: Arc::new(Pacer::new(Duration::from_millis(500))),
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.pacer = Arc::new(Pacer::new(delay));
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn state(&self) -> CycleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("pipeline paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("pipeline resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Skip `name` in later cycles. The name must exist in `config`.
    pub fn pause_source(&self, name: &str, config: &PipelineConfig) -> Result<(), PipelineError> {
        let source = lookup_source(name, config)?;
        self.paused_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.name.to_lowercase());
        tracing::info!(source = %source.name, "source paused");
        Ok(())
    }

    pub fn resume_source(&self, name: &str, config: &PipelineConfig) -> Result<(), PipelineError> {
        let source = lookup_source(name, config)?;
        self.paused_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&source.name.to_lowercase());
        tracing::info!(source = %source.name, "source resumed");
        Ok(())
    }

    /// Paused at runtime via [`pause_source`](Self::pause_source).
    pub fn is_source_paused(&self, source: &Source) -> bool {
        self.paused_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&source.name.to_lowercase())
    }

    /// Cancel in-flight work and refuse further cycles.
    pub fn shutdown(&self) {
        self.cancel.send_replace(true);
        tracing::info!("pipeline shutdown requested");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn stopped(&self) {
        cancelled(&mut self.cancel.subscribe()).await
    }

    fn enter(&self, report: &mut CycleReport, state: CycleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        report.transitions.push(state);
        tracing::debug!(state = ?state, "cycle state");
    }

    fn finish(&self, mut report: CycleReport, t0: Instant) -> CycleReport {
        self.enter(&mut report, CycleState::Idle);
        report.duration = t0.elapsed();
        histogram!("cycle_duration_ms").record(report.duration.as_secs_f64() * 1_000.0);
        gauge!("cycle_last_run_ts").set(Utc::now().timestamp() as f64);
        report
    }

    /// Run one cycle against `config`. Only one cycle runs at a time; a
    /// concurrent call gets [`PipelineError::CycleInProgress`].
    pub async fn run_cycle(&self, config: &PipelineConfig) -> Result<CycleReport, PipelineError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| PipelineError::CycleInProgress)?;
        if self.is_shut_down() {
            return Err(PipelineError::Cancelled);
        }
        ensure_metrics_described();

        let t0 = Instant::now();
        let now = Utc::now();
        let mut report = CycleReport {
            started_at: Some(now),
            ..Default::default()
        };

        if self.is_paused() {
            self.enter(&mut report, CycleState::Paused);
            report.paused = true;
            tracing::info!("cycle skipped: pipeline paused");
            return Ok(self.finish(report, t0));
        }

        // --- Fetch + dedup ---
        self.enter(&mut report, CycleState::Fetching);
        let settings = &config.settings;
        let sources: Vec<Source> = config
            .sources
            .iter()
            .filter(|s| s.is_fetchable() && !self.is_source_paused(s))
            .cloned()
            .collect();
        let by_name: HashMap<String, Source> =
            sources.iter().map(|s| (s.name.clone(), s.clone())).collect();

        let swept = self.ctx.dedup.sweep(now);
        if swept > 0 {
            tracing::debug!(swept, "dedup entries expired");
        }

        let fetcher = Fetcher::new(self.ctx.feed.clone())
            .with_concurrency(settings.concurrency)
            .with_timeout(settings.fetch_timeout())
            .with_max_items(settings.max_items_per_source);
        let outcomes = fetcher.fetch_all(&sources, self.cancel.subscribe()).await;

        let mut fresh: Vec<Item> = Vec::new();
        for outcome in outcomes {
            let name = outcome.source.name.clone();
            match outcome.result {
                Ok(entries) => {
                    self.ctx.health.record_success(&name, outcome.elapsed, Utc::now());
                    report.sources_fetched += 1;
                    report.entries_fetched += entries.len();
                    let mut accepted = 0usize;
                    for entry in entries {
                        let Some(item) = build_item(&outcome.source, entry, now) else {
                            continue;
                        };
                        if self.ctx.dedup.check_and_mark(&item.id, now) {
                            accepted += 1;
                            fresh.push(item);
                        } else {
                            report.items_duplicate += 1;
                        }
                    }
                    self.ctx.health.record_accepted(&name, accepted);
                }
                Err(FetchErrorKind::Cancelled) => report.cancelled = true,
                Err(kind) => {
                    self.ctx
                        .health
                        .record_failure(&name, &kind.to_string(), outcome.elapsed, Utc::now());
                    report.errors.push(PipelineError::fetch(name, kind));
                }
            }
        }
        report.items_new = fresh.len();
        counter!("items_new_total").increment(report.items_new as u64);
        counter!("items_duplicate_total").increment(report.items_duplicate as u64);
        tracing::info!(
            target: "ingest",
            sources = sources.len(),
            fetched = report.sources_fetched,
            entries = report.entries_fetched,
            new = report.items_new,
            duplicates = report.items_duplicate,
            errors = report.errors.len(),
            "ingest summary"
        );

        if report.cancelled || self.is_shut_down() {
            report.cancelled = true;
            return Ok(self.finish(report, t0));
        }

        // --- Classify, moderate, score ---
        self.enter(&mut report, CycleState::Classifying);
        let enricher = Enricher::new(self.ctx.classifier.clone(), self.ctx.scorer.clone())
            .with_timeout(Duration::from_secs(config.ai.timeout_secs.max(1)))
            .with_excerpt_chars(config.ai.excerpt_chars)
            .with_content_filtering(settings.content_filtering);
        let Some(enriched) = self.enrich_all(fresh, &by_name, enricher, settings.concurrency, now).await else {
            report.cancelled = true;
            return Ok(self.finish(report, t0));
        };

        let mut deliverable = Vec::with_capacity(enriched.len());
        for outcome in enriched {
            match outcome {
                EnrichOutcome::Deliver(item) => {
                    if item.content_warning.is_some() {
                        report.items_warned += 1;
                    }
                    deliverable.push(item);
                }
                EnrichOutcome::Dropped { item, verdict } => report.moderation_events.push(ModerationEvent {
                    item: item.id.clone(),
                    source: item.source.clone(),
                    title: item.title.clone(),
                    severity: verdict.severity,
                    categories: verdict.flagged.clone(),
                    explanation: verdict.explanation(),
                }),
            }
        }

        // --- Route ---
        self.enter(&mut report, CycleState::Routing);
        let router = DeliveryRouter::new(&settings.default_destination, &config.rules);
        let mut order: Vec<String> = Vec::new();
        let mut per_dest: HashMap<String, Vec<Item>> = HashMap::new();
        for item in &deliverable {
            let Some(source) = by_name.get(&item.source) else {
                continue;
            };
            for dest in router.route(item, source) {
                if !per_dest.contains_key(&dest) {
                    order.push(dest.clone());
                }
                per_dest.entry(dest).or_default().push(item.clone());
            }
        }

        // --- Render ---
        self.enter(&mut report, CycleState::Rendering);
        let renderer = Renderer::new(settings.render_limits());
        let mut batches: Vec<(String, Vec<OutboundMessage>)> = Vec::with_capacity(order.len());
        for dest in order {
            let mut items = per_dest.remove(&dest).unwrap_or_default();
            items.sort_by(|a, b| b.published.cmp(&a.published));
            let rule = config.rule_for(&dest);
            if let Some(rule) = rule {
                items.truncate(rule.max_items);
            }
            let opts = rule.map(RenderOptions::from).unwrap_or_default();
            let messages = renderer.render(&items, &opts);
            tracing::debug!(destination = %dest, items = items.len(), messages = messages.len(), "rendered");
            batches.push((dest, messages));
        }

        // --- Deliver ---
        self.enter(&mut report, CycleState::Delivering);
        let (deliveries, cancelled_mid_delivery) = self.deliver_all(batches).await;
        for d in &deliveries {
            for reason in &d.failures {
                report.errors.push(PipelineError::delivery(&d.destination, reason));
            }
        }
        report.deliveries = deliveries;
        report.cancelled = cancelled_mid_delivery;

        self.record_history(config, &deliverable, &report).await;

        if !report.errors.is_empty() {
            tracing::warn!(errors = %report.errors, "cycle finished with errors");
        }
        Ok(self.finish(report, t0))
    }

    /// Send a digest of the items delivered between `start` and `end` to
    /// `destination`. Nothing is sent when the window is empty.
    pub async fn send_digest(
        &self,
        config: &PipelineConfig,
        destination: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DeliveryReport, PipelineError> {
        if self.is_shut_down() {
            return Err(PipelineError::Cancelled);
        }
        let records = self
            .ctx
            .store
            .recent_items(usize::MAX)
            .await
            .map_err(|e| PipelineError::delivery(destination, format!("history unavailable: {e:#}")))?;
        let limits = config.settings.render_limits();
        let digest = build_digest(&records, start, end, &limits);
        if digest.is_empty() {
            tracing::info!(destination, "digest skipped: nothing in window");
            return Ok(DeliveryReport {
                destination: destination.to_string(),
                ..Default::default()
            });
        }
        let batch = vec![(destination.to_string(), digest.messages(&limits))];
        let (mut reports, _) = self.deliver_all(batch).await;
        Ok(reports.pop().unwrap_or_default())
    }

    /// Enrich items concurrently (bounded), preserving order. `None` when the
    /// cycle was cancelled.
    async fn enrich_all(
        &self,
        items: Vec<Item>,
        sources: &HashMap<String, Source>,
        enricher: Enricher,
        concurrency: usize,
        now: DateTime<Utc>,
    ) -> Option<Vec<EnrichOutcome>> {
        let sem = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut pending: Vec<(Item, JoinHandle<EnrichOutcome>)> = Vec::with_capacity(items.len());
        for item in items {
            let fallback = item.clone();
            let source = sources
                .get(&item.source)
                .cloned()
                .unwrap_or_else(|| Source::new(item.source.clone(), ""));
            let sem = sem.clone();
            let enricher = enricher.clone();
            pending.push((
                fallback,
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await;
                    enricher.enrich(item, &source, now).await
                }),
            ));
        }

        let mut cancel = self.cancel.subscribe();
        let mut out = Vec::with_capacity(pending.len());
        let mut rest = pending.into_iter();
        while let Some((fallback, mut handle)) = rest.next() {
            let joined = tokio::select! {
                r = &mut handle => r,
                _ = cancelled(&mut cancel) => {
                    handle.abort();
                    for (_, h) in rest {
                        h.abort();
                    }
                    tracing::warn!("enrichment abandoned: cycle cancelled");
                    return None;
                }
            };
            match joined {
                Ok(outcome) => out.push(outcome),
                Err(e) => {
                    tracing::error!(item = %fallback.id, error = %e, "enrichment task failed; delivering unenriched");
                    out.push(EnrichOutcome::Deliver(fallback));
                }
            }
        }
        Some(out)
    }

    /// One task per destination; sends within a destination are paced and
    /// sequential. Returns the reports and whether delivery was cut short.
    async fn deliver_all(&self, batches: Vec<(String, Vec<OutboundMessage>)>) -> (Vec<DeliveryReport>, bool) {
        let mut handles = Vec::with_capacity(batches.len());
        for (dest, messages) in batches {
            let messenger = self.ctx.messenger.clone();
            let pacer = self.pacer.clone();
            let mut cancel = self.cancel.subscribe();
            let name = dest.clone();
            handles.push((
                name,
                tokio::spawn(async move {
                    let mut rep = DeliveryReport {
                        destination: dest.clone(),
                        ..Default::default()
                    };
                    let mut cut_short = false;
                    for msg in messages {
                        if *cancel.borrow() {
                            cut_short = true;
                            break;
                        }
                        let sent = tokio::select! {
                            r = async {
                                pacer.wait_turn(&dest).await;
                                messenger.send(&dest, &msg).await
                            } => r,
                            _ = cancelled(&mut cancel) => {
                                cut_short = true;
                                break;
                            }
                        };
                        match sent {
                            Ok(()) => {
                                rep.messages_sent += 1;
                                rep.items.extend(msg.item_ids.iter().cloned());
                                counter!("deliveries_total").increment(1);
                            }
                            Err(e) => {
                                rep.messages_failed += 1;
                                rep.failures.push(format!("{e:#}"));
                                counter!("delivery_errors_total").increment(1);
                                tracing::warn!(target: "delivery", destination = %dest, error = ?e, "send failed");
                            }
                        }
                    }
                    tracing::info!(
                        target: "delivery",
                        destination = %dest,
                        sent = rep.messages_sent,
                        failed = rep.messages_failed,
                        items = rep.items.len(),
                        "delivery finished"
                    );
                    (rep, cut_short)
                }),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut any_cut = false;
        for (dest, h) in handles {
            match h.await {
                Ok((rep, cut)) => {
                    any_cut |= cut;
                    reports.push(rep);
                }
                Err(e) => {
                    tracing::error!(destination = %dest, error = %e, "delivery task failed");
                    reports.push(DeliveryReport {
                        destination: dest,
                        messages_failed: 1,
                        failures: vec![format!("delivery task failed: {e}")],
                        ..Default::default()
                    });
                }
            }
        }
        (reports, any_cut)
    }

    async fn record_history(
        &self,
        config: &PipelineConfig,
        items: &[Item],
        report: &CycleReport,
    ) {
        let now = Utc::now();
        for source in &config.sources {
            let record = SourceRecord {
                source: source.clone(),
                stats: self.ctx.health.get(&source.name),
                updated_at: now,
            };
            if let Err(e) = self.ctx.store.upsert_source(record).await {
                tracing::warn!(source = %source.name, error = ?e, "history: source upsert failed");
            }
        }

        let delivered: HashSet<&ItemId> = report.deliveries.iter().flat_map(|d| d.items.iter()).collect();
        for item in items.iter().filter(|i| delivered.contains(&i.id)) {
            let destinations = report
                .deliveries
                .iter()
                .filter(|d| d.items.contains(&item.id))
                .map(|d| d.destination.clone())
                .collect::<Vec<_>>();
            let record = ItemRecord {
                item: item.clone(),
                destinations,
                delivered_at: now,
            };
            if let Err(e) = self.ctx.store.record_item(record).await {
                tracing::warn!(item = %item.id, error = ?e, "history: item record failed");
            }
        }
    }
}

fn lookup_source<'a>(name: &str, config: &'a PipelineConfig) -> Result<&'a Source, PipelineError> {
    config.source(name.trim()).ok_or_else(|| PipelineError::UnknownSource {
        name: name.to_string(),
        suggestion: suggest_source(name, config),
    })
}

/// Closest configured name, if reasonably close.
fn suggest_source(name: &str, config: &PipelineConfig) -> Option<String> {
    let needle = name.trim().to_lowercase();
    config
        .sources
        .iter()
        .map(|s| (strsim::normalized_levenshtein(&needle, &s.name.to_lowercase()), &s.name))
        .filter(|(score, _)| *score >= 0.6)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, n)| n.clone())
}
