//! Classification service adapter: provider abstraction + daily call budget.
//!
//! The pipeline only sees [`ClassifierClient`]. Real providers sit behind
//! [`Provider`] and are wrapped by [`BudgetedClient`], which counts
//! classification calls per UTC day and refuses once the budget is spent.
//! Moderation is never counted, so the safety gate keeps working on a spent
//! budget.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::moderation::{CategoryScore, ModerationScores};
use crate::config::ai::ClassifierConfig;
use crate::model::{ClassificationResult, Sentiment};

pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Request body for both classification and moderation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassifyRequest {
    pub source: String,
    /// Already truncated to the configured excerpt length.
    pub content: String,
}

impl ClassifyRequest {
    pub fn new(source: &str, title: &str, content: &str, excerpt_chars: usize) -> Self {
        let joined = if content.trim().is_empty() || content.trim() == title.trim() {
            title.trim().to_string()
        } else {
            format!("{}. {}", title.trim(), content.trim())
        };
        Self {
            source: source.to_string(),
            content: joined.chars().take(excerpt_chars).collect(),
        }
    }
}

/// Trait object used by the enrichment stage (and tests).
pub trait ClassifierClient: Send + Sync {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult>;
    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn ClassifierClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns the deterministic mock provider.
/// * Else if `enabled == false`, returns a disabled client.
/// * Else builds the real provider wrapped with the daily budget.
pub fn build_client_from_config(config: &ClassifierConfig) -> DynClassifier {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(BudgetedClient::new(MockProvider, config.daily_limit));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(config) {
            Ok(p) => Arc::new(BudgetedClient::new(p, config.daily_limit)),
            Err(e) => {
                tracing::warn!(error = ?e, "classifier: openai provider unavailable, disabling");
                Arc::new(DisabledClient)
            }
        },
        "mock" => Arc::new(BudgetedClient::new(MockProvider, config.daily_limit)),
        other => {
            tracing::warn!(provider = other, "classifier: unknown provider, disabling");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider that performs a real remote call.
pub trait Provider: Send + Sync + 'static {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult>;
    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible provider: chat completions for classification and the
/// moderations endpoint for moderation.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("openai provider needs an api key");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("newsrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building classifier http client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }
}

const SYSTEM_PROMPT: &str = "You classify news articles. Reply with JSON only: \
{\"sentiment\":\"positive|negative|neutral\",\"score\":-1..1,\"topics\":[<=5 strings],\
\"keywords\":[<=10 strings],\"entities\":{\"person\":n,\"organization\":n,\"location\":n},\
\"is_opinionated\":bool}";

impl Provider for OpenAiProvider {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: String,
            }

            let user = format!("Source: {}\n\n{}", req.source, req.content);
            let body = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    Msg {
                        role: "user",
                        content: &user,
                    },
                ],
                temperature: 0.0,
            };

            let resp = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("classification request")?
                .error_for_status()
                .context("classification status")?;
            let parsed: Resp = resp.json().await.context("classification body")?;
            let content = parsed
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .ok_or_else(|| anyhow!("classification response without choices"))?;
            parse_classification(content)
        })
    }

    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Req<'a> {
                input: &'a str,
            }
            #[derive(Deserialize)]
            struct Resp {
                results: Vec<ModResult>,
            }
            #[derive(Deserialize)]
            struct ModResult {
                #[serde(default)]
                categories: BTreeMap<String, bool>,
                #[serde(default)]
                category_scores: BTreeMap<String, f64>,
            }

            let resp = self
                .http
                .post(format!("{}/moderations", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&Req { input: &req.content })
                .send()
                .await
                .context("moderation request")?
                .error_for_status()
                .context("moderation status")?;
            let parsed: Resp = resp.json().await.context("moderation body")?;
            let first = parsed
                .results
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("moderation response without results"))?;

            let mut scores = ModerationScores::default();
            for (name, confidence) in first.category_scores {
                let flagged = first.categories.get(&name).copied().unwrap_or(false);
                scores
                    .categories
                    .insert(name, CategoryScore { flagged, confidence });
            }
            Ok(scores)
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    entities: BTreeMap<String, u32>,
    #[serde(default)]
    entity_count: Option<u32>,
    #[serde(default, alias = "opinionated")]
    is_opinionated: bool,
}

/// Parse the model's JSON answer, tolerating ```json fences.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    let parsed: RawClassification =
        serde_json::from_str(body).context("classification JSON malformed")?;

    let mut entities = parsed.entities;
    if entities.is_empty() {
        if let Some(n) = parsed.entity_count {
            entities.insert("total".to_string(), n);
        }
    }

    Ok(ClassificationResult {
        sentiment: Sentiment::parse(&parsed.sentiment),
        score: parsed.score,
        topics: parsed.topics,
        keywords: parsed.keywords,
        entities,
        opinionated: parsed.is_opinionated,
        moderation: None,
    }
    .sanitized())
}

/// Fails every call; used when classification is disabled.
pub struct DisabledClient;

impl ClassifierClient for DisabledClient {
    fn classify<'a>(&'a self, _req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        Box::pin(async { Err(anyhow!("classification disabled")) })
    }
    fn moderate<'a>(&'a self, _req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        Box::pin(async { Err(anyhow!("moderation disabled")) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic provider for local runs: neutral, nothing flagged.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockProvider;

impl Provider for MockProvider {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        let topics = vec![req.source.clone()];
        Box::pin(async move {
            Ok(ClassificationResult {
                topics,
                ..Default::default()
            })
        })
    }
    fn moderate<'a>(&'a self, _req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        Box::pin(async { Ok(ModerationScores::default()) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Budget wrapper
// ------------------------------------------------------------

pub struct BudgetedClient<P: Provider> {
    inner: P,
    daily_limit: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> BudgetedClient<P> {
    pub fn new(inner: P, daily_limit: u32) -> Self {
        Self {
            inner,
            daily_limit,
            counter: Arc::new(Mutex::new(DailyCounter::default())),
        }
    }

    /// Reserve one call for today, or refuse when the budget is spent.
    fn take_budget(&self) -> Result<()> {
        let mut g = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        let today = Utc::now().date_naive();
        if g.date != today {
            g.date = today;
            g.count = 0;
        }
        if g.count >= self.daily_limit {
            bail!("daily classification budget of {} spent", self.daily_limit);
        }
        g.count += 1;
        Ok(())
    }

    pub fn calls_today(&self) -> u32 {
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count
    }
}

impl<P: Provider> ClassifierClient for BudgetedClient<P> {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        Box::pin(async move {
            self.take_budget()?;
            self.inner.classify(req).await
        })
    }
    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        self.inner.moderate(req)
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            count: 0,
        }
    }
}

// ------------------------------------------------------------
// Scripted client for tests and dry runs
// ------------------------------------------------------------

/// Answers from a script keyed on substrings of the request content.
/// Unmatched requests get the default classification and a clean moderation result.
#[derive(Default)]
pub struct StaticClassifier {
    default: ClassificationResult,
    classifications: Vec<(String, ClassificationResult)>,
    moderations: Vec<(String, ModerationScores)>,
    failing: bool,
    failing_moderation: bool,
    delay: Option<Duration>,
}

impl StaticClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, result: ClassificationResult) -> Self {
        self.default = result;
        self
    }

    pub fn classify_when(mut self, needle: &str, result: ClassificationResult) -> Self {
        self.classifications.push((needle.to_string(), result));
        self
    }

    pub fn moderate_when(mut self, needle: &str, scores: ModerationScores) -> Self {
        self.moderations.push((needle.to_string(), scores));
        self
    }

    /// Every classification call errors.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Every moderation call errors.
    pub fn failing_moderation(mut self) -> Self {
        self.failing_moderation = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
    }
}

impl ClassifierClient for StaticClassifier {
    fn classify<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ClassificationResult> {
        Box::pin(async move {
            self.pause().await;
            if self.failing {
                bail!("scripted classification failure");
            }
            Ok(self
                .classifications
                .iter()
                .find(|(n, _)| req.content.contains(n.as_str()))
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| self.default.clone()))
        })
    }

    fn moderate<'a>(&'a self, req: &'a ClassifyRequest) -> BoxFut<'a, ModerationScores> {
        Box::pin(async move {
            self.pause().await;
            if self.failing_moderation {
                bail!("scripted moderation failure");
            }
            Ok(self
                .moderations
                .iter()
                .find(|(n, _)| req.content.contains(n.as_str()))
                .map(|(_, s)| s.clone())
                .unwrap_or_default())
        })
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}
