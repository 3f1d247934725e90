//! Trade analysis via an OpenAI-compatible chat completion API
//!
//! Asks the model for a JSON verdict on one instrument. Every failure path
//! surfaces as an `Err` so the caller can fall back to the heuristic.

use crate::inference::{Analysis, InferenceService, InstrumentContext};
use crate::Result;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

const MAX_TOKENS: u32 = 512;
const MAX_RETRIES: u32 = 2;
const RETRY_DELAY_MS: u64 = 1500;
const REQUESTS_PER_MINUTE: u32 = 20;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

pub struct OpenAiAnalyst {
    api_key: String,
    api_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
}

impl OpenAiAnalyst {
    pub fn new(
        api_key: String,
        api_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let per_minute = NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN);

        Self {
            api_key,
            api_url: api_url.into(),
            model: model.into(),
            timeout,
            client,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    async fn analyze_with_retries(&self, context: &InstrumentContext) -> Result<Analysis> {
        let prompt = create_prompt(context);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.until_ready().await;

            match self.request_once(&prompt).await {
                Ok(analysis) => return Ok(analysis),
                Err(RequestError::Fatal(e)) => return Err(e.into()),
                Err(RequestError::Retryable(e)) => {
                    if attempt >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    tracing::debug!(
                        instrument = %context.instrument,
                        "Inference attempt {} failed: {}. Retrying...",
                        attempt,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }
    }

    async fn request_once(&self, prompt: &str) -> std::result::Result<Analysis, RequestError> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You are a perpetual futures analyst. Respond with valid JSON only, no markdown formatting.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestError::Retryable(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Inference API error {}: {}", status, body);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                RequestError::Retryable(message)
            } else {
                RequestError::Fatal(message)
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| RequestError::Retryable(format!("JSON decode error: {}", e)))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RequestError::Retryable("Empty choices".to_string()))?;

        parse_analysis(&text).map_err(RequestError::Retryable)
    }
}

enum RequestError {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl InferenceService for OpenAiAnalyst {
    async fn analyze(&self, context: &InstrumentContext) -> Result<Analysis> {
        match tokio::time::timeout(self.timeout, self.analyze_with_retries(context)).await {
            Ok(result) => result,
            Err(_) => Err(format!("Inference timed out after {:?}", self.timeout).into()),
        }
    }
}

/// Strip markdown fences and parse the JSON verdict
pub fn parse_analysis(raw: &str) -> std::result::Result<Analysis, String> {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    }

    let analysis: Analysis = serde_json::from_str(text)
        .map_err(|e| format!("JSON parse error: {} (text: {})", e, text))?;

    let numbers = [
        analysis.confidence,
        analysis.take_profit_pct,
        analysis.stop_loss_pct,
        analysis.hold_minutes,
    ];
    if numbers.iter().any(|n| !n.is_finite()) {
        return Err("Non-finite number in analysis".to_string());
    }

    Ok(analysis)
}

fn create_prompt(ctx: &InstrumentContext) -> String {
    let prices: Vec<String> = ctx
        .recent_prices
        .iter()
        .rev()
        .take(20)
        .rev()
        .map(|p| format!("{:.6}", p))
        .collect();

    format!(
        r#"Analyze the perpetual futures market {instrument} and decide whether to open a position.

## Market Summary
- Price: {price:.6}
- 24H Change: {change:+.2}%
- Funding Rate: {funding:+.4}% ({bias:?})
- Volume Tier: {volume:?}
- Momentum: {momentum:?}
- Composite Score: {score:+.1} (range -100..100)
- Volatility Trend: {vol_trend:?}
- Momentum Shift (direction reversed vs 5 observations ago): {shift}
- Recent prices (oldest first): [{prices}]

Respond ONLY with valid JSON:

{{
  "direction": "long|short|neutral",
  "confidence": 0-100,
  "rationale": "one or two sentences",
  "take_profit_pct": 2.5,
  "stop_loss_pct": 1.2,
  "hold_minutes": 120,
  "urgency": "immediate|soon|wait"
}}
"#,
        instrument = ctx.instrument,
        price = ctx.price,
        change = ctx.change_24h_pct,
        funding = ctx.funding_rate_pct,
        bias = ctx.funding_bias,
        volume = ctx.volume_tier,
        momentum = ctx.momentum,
        score = ctx.score,
        vol_trend = ctx.volatility_trend,
        shift = ctx.momentum_shift,
        prices = prices.join(", "),
    )
}
