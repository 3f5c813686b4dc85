use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Embed, Messenger, OutboundMessage};

/// Posts messages to Discord-compatible webhooks, one webhook URL per destination.
#[derive(Clone)]
pub struct DiscordMessenger {
    webhooks: HashMap<String, String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordMessenger {
    pub fn new(webhooks: HashMap<String, String>) -> Self {
        Self {
            webhooks,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn knows(&self, destination: &str) -> bool {
        self.webhooks.contains_key(destination)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn send(&self, destination: &str, message: &OutboundMessage) -> Result<()> {
        let webhook = self
            .webhooks
            .get(destination)
            .ok_or_else(|| anyhow!("no webhook configured for destination {destination}"))?;
        let payload = WebhookPayload::from(message);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                            continue;
                        }
                        return Err(anyhow!("webhook HTTP error for {destination}: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("webhook request failed for {destination}: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct WireFooter<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireUrl<'a> {
    url: &'a str,
}

#[derive(Serialize)]
struct WireField<'a> {
    name: &'a str,
    value: &'a str,
    inline: bool,
}

#[derive(Serialize)]
struct WireEmbed<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<WireField<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<WireFooter<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<WireUrl<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: Option<&'a str>,
    embeds: Vec<WireEmbed<'a>>,
}

impl<'a> From<&'a Embed> for WireEmbed<'a> {
    fn from(e: &'a Embed) -> Self {
        Self {
            title: &e.title,
            url: e.url.as_deref(),
            description: &e.description,
            color: e.color,
            fields: e
                .fields
                .iter()
                .map(|f| WireField {
                    name: &f.name,
                    value: &f.value,
                    inline: f.inline,
                })
                .collect(),
            footer: e.footer.as_deref().map(|text| WireFooter { text }),
            thumbnail: e.thumbnail.as_deref().map(|url| WireUrl { url }),
            timestamp: e.timestamp.as_deref(),
        }
    }
}

impl<'a> From<&'a OutboundMessage> for WebhookPayload<'a> {
    fn from(m: &'a OutboundMessage) -> Self {
        Self {
            content: m.content.as_deref(),
            embeds: m.embeds.iter().map(WireEmbed::from).collect(),
        }
    }
}
