//! Outbound message model and the messaging-platform collaborator.

pub mod discord;
pub mod pacing;

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::model::ItemId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Structured content block.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    /// Characters counted against the per-message limit: title, description,
    /// field names and values, footer.
    pub fn char_len(&self) -> usize {
        self.title.chars().count()
            + self.description.chars().count()
            + self
                .fields
                .iter()
                .map(|f| f.name.chars().count() + f.value.chars().count())
                .sum::<usize>()
            + self.footer.as_deref().map_or(0, |f| f.chars().count())
    }
}

/// One message to one destination: plain text or a list of embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct OutboundMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    /// Items packed into this message, in order.
    #[serde(skip)]
    pub item_ids: Vec<ItemId>,
}

impl OutboundMessage {
    pub fn char_len(&self) -> usize {
        self.content.as_deref().map_or(0, |c| c.chars().count())
            + self.embeds.iter().map(Embed::char_len).sum::<usize>()
    }

    pub fn item_count(&self) -> usize {
        self.item_ids.len()
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Writes messages to the log instead of a platform. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<()> {
        tracing::info!(
            target: "delivery",
            destination,
            items = message.item_count(),
            chars = message.char_len(),
            "message (log only)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// In-memory messenger for tests and dry runs. Destinations in `failing`
/// reject every send.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failing: HashSet<String>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, destination: impl Into<String>) -> Self {
        self.failing.insert(destination.into());
        self
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, m)| m)
            .collect()
    }

    /// Item ids delivered to `destination`, in send order.
    pub fn items_to(&self, destination: &str) -> Vec<ItemId> {
        self.sent_to(destination)
            .into_iter()
            .flat_map(|m| m.item_ids)
            .collect()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<()> {
        if self.failing.contains(destination) {
            return Err(anyhow!("destination {destination} rejected the message"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_string(), message.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
