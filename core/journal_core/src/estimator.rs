//! Gain estimation through a generative-AI endpoint.
//!
//! The estimator asks the model to rate the five attributes for one activity
//! and reflection, retrying with exponential backoff while the endpoint
//! answers 429. Anything else that goes wrong ends in [`EstimateError`];
//! [`GainEstimator::estimate_or_zero`] turns that into zero gains so saving an
//! entry never depends on the endpoint being up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::model::{Attribute, GainDelta, MAX_GAIN};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request failed: still rate limited after {retries} retries")]
    RetriesExhausted { retries: u32 },
    #[error("unexpected response: {0}")]
    Response(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        }
    }
}

/// Raw status and body of one endpoint call.
#[derive(Clone, Debug)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

/// One HTTP round trip to the model. Transport failures (no connection,
/// unreadable body) are reported as [`EstimateError::Request`].
#[async_trait]
pub trait GainBackend: Send + Sync {
    async fn generate(&self, body: &Value) -> Result<BackendResponse, EstimateError>;
}

pub struct GeminiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(base_url: &str, model: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GainBackend for GeminiBackend {
    async fn generate(&self, body: &Value) -> Result<BackendResponse, EstimateError> {
        let res = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| EstimateError::Request(e.to_string()))?;
        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| EstimateError::Request(e.to_string()))?;
        Ok(BackendResponse { status, body })
    }
}

/// Used when no API key is configured: every call fails, so every entry
/// is saved with zero gains.
pub struct OfflineBackend;

#[async_trait]
impl GainBackend for OfflineBackend {
    async fn generate(&self, _body: &Value) -> Result<BackendResponse, EstimateError> {
        Err(EstimateError::Request("no AI endpoint configured".to_string()))
    }
}

#[derive(Clone)]
pub struct GainEstimator {
    backend: Arc<dyn GainBackend>,
    policy: RetryPolicy,
}

impl GainEstimator {
    pub fn new(backend: Arc<dyn GainBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn offline() -> Self {
        Self::new(Arc::new(OfflineBackend), RetryPolicy::default())
    }

    pub async fn estimate(&self, activity: &str, feeling: &str) -> Result<GainDelta, EstimateError> {
        let body = request_body(&build_prompt(activity, feeling));
        let mut delay = self.policy.initial_delay;
        let mut retries_left = self.policy.max_retries;

        loop {
            let res = self.backend.generate(&body).await?;
            if (200..300).contains(&res.status) {
                return parse_response(&res.body);
            }
            if res.status != HTTP_TOO_MANY_REQUESTS {
                return Err(EstimateError::Request(format!("http_{}", res.status)));
            }
            if retries_left == 0 {
                return Err(EstimateError::RetriesExhausted {
                    retries: self.policy.max_retries,
                });
            }
            warn!(
                "rate limited, retrying in {}ms ({} retries left)",
                delay.as_millis(),
                retries_left
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            retries_left -= 1;
        }
    }

    pub async fn estimate_or_zero(&self, activity: &str, feeling: &str) -> GainDelta {
        match self.estimate(activity, feeling).await {
            Ok(gains) => {
                info!("estimated gains total={}", gains.total());
                gains
            }
            Err(err) => {
                warn!("gain estimation failed, saving with zero gains: {err}");
                GainDelta::zero()
            }
        }
    }
}

pub fn build_prompt(activity: &str, feeling: &str) -> String {
    format!(
        "You are scoring a personal growth journal.\n\
         Today's activity: \"{activity}\"\n\
         How it felt and what was learned: \"{feeling}\"\n\n\
         Rate how much this activity grew each of the following attributes \
         on an integer scale from 0 (not at all) to {MAX_GAIN} (a great deal): \
         diligence, knowledge, courage, understanding, expression.\n\
         Answer with a JSON object containing exactly those five integer fields."
    )
}

pub fn request_body(prompt: &str) -> Value {
    let mut properties = serde_json::Map::new();
    for attr in Attribute::ALL {
        properties.insert(attr.key().to_string(), json!({ "type": "INTEGER" }));
    }
    let required: Vec<&str> = Attribute::ALL.iter().map(|a| a.key()).collect();

    json!({
        "contents": [
            { "parts": [ { "text": prompt } ] }
        ],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            }
        }
    })
}

/// Pull `candidates[0].content.parts[0].text` out of a response body and read
/// the five gains from it. Values outside `0..=MAX_GAIN` are clamped.
pub fn parse_response(body: &str) -> Result<GainDelta, EstimateError> {
    let v: Value =
        serde_json::from_str(body).map_err(|e| EstimateError::Response(format!("body is not json: {e}")))?;
    let text = v
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| EstimateError::Response("missing candidates[0].content.parts[0].text".to_string()))?;
    let gains: Value = serde_json::from_str(text)
        .map_err(|e| EstimateError::Response(format!("candidate text is not json: {e}")))?;

    let mut raw = [0_i64; 5];
    for (slot, attr) in raw.iter_mut().zip(Attribute::ALL) {
        let n = gains.get(attr.key()).ok_or_else(|| {
            EstimateError::Response(format!("missing field '{}'", attr.key()))
        })?;
        *slot = n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| EstimateError::Response(format!("field '{}' is not a number", attr.key())))?;
    }

    let (delta, clamped) = GainDelta::from_raw_clamped(raw);
    if clamped {
        warn!("model returned gains outside 0..={MAX_GAIN}: {raw:?}; clamped");
    }
    Ok(delta)
}
