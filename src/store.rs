//! Persistence collaborator: source and item history.
//!
//! The pipeline only writes here after delivery; nothing read back from the
//! store influences routing or dedup.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::health::SourceStats;
use crate::model::{Item, ItemId, Source};

/// Source configuration together with its latest health stats.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRecord {
    pub source: Source,
    pub stats: Option<SourceStats>,
    pub updated_at: DateTime<Utc>,
}

/// A delivered item and where it went.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    pub item: Item,
    pub destinations: Vec<String>,
    pub delivered_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn upsert_source(&self, record: SourceRecord) -> Result<()>;
    async fn get_source(&self, name: &str) -> Result<Option<SourceRecord>>;
    async fn record_item(&self, record: ItemRecord) -> Result<()>;
    async fn get_item(&self, id: &ItemId) -> Result<Option<ItemRecord>>;
    async fn delete_item(&self, id: &ItemId) -> Result<bool>;
    /// Most recent first.
    async fn recent_items(&self, n: usize) -> Result<Vec<ItemRecord>>;
}

#[derive(Debug, Default)]
struct Inner {
    sources: HashMap<String, SourceRecord>,
    items: HashMap<ItemId, ItemRecord>,
    order: VecDeque<ItemId>,
}

/// Bounded in-memory history; the oldest items are evicted past `cap`.
#[derive(Debug)]
pub struct InMemoryHistory {
    inner: Mutex<Inner>,
    cap: usize,
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::with_capacity(1_000)
    }
}

impl InMemoryHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cap: cap.clamp(1, 100_000),
        }
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn upsert_source(&self, record: SourceRecord) -> Result<()> {
        self.lock().sources.insert(record.source.name.clone(), record);
        Ok(())
    }

    async fn get_source(&self, name: &str) -> Result<Option<SourceRecord>> {
        Ok(self.lock().sources.get(name).cloned())
    }

    async fn record_item(&self, record: ItemRecord) -> Result<()> {
        let mut g = self.lock();
        let id = record.item.id.clone();
        if g.items.insert(id.clone(), record).is_some() {
            g.order.retain(|x| x != &id);
        }
        g.order.push_back(id);
        while g.order.len() > self.cap {
            if let Some(old) = g.order.pop_front() {
                g.items.remove(&old);
            }
        }
        Ok(())
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<ItemRecord>> {
        Ok(self.lock().items.get(id).cloned())
    }

    async fn delete_item(&self, id: &ItemId) -> Result<bool> {
        let mut g = self.lock();
        let existed = g.items.remove(id).is_some();
        if existed {
            g.order.retain(|x| x != id);
        }
        Ok(existed)
    }

    async fn recent_items(&self, n: usize) -> Result<Vec<ItemRecord>> {
        let g = self.lock();
        Ok(g.order
            .iter()
            .rev()
            .take(n)
            .filter_map(|id| g.items.get(id).cloned())
            .collect())
    }
}
