use crate::api::MarketDataSource;
use crate::models::InstrumentData;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::num::ParseFloatError;
use tokio::time::{sleep, Duration};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the Hyperliquid perpetuals info endpoint
#[derive(Clone)]
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<AssetMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMeta {
    name: String,
    max_leverage: u32,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetContext {
    funding: String,
    open_interest: String,
    prev_day_px: String,
    day_ntl_vlm: String,
    mark_px: String,
}

impl HyperliquidClient {
    /// Create a client against `base_url` (the public API or a test server)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch all perpetual instruments, retrying transient failures with exponential backoff
    pub async fn get_instruments(&self) -> Result<Vec<InstrumentData>> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.fetch_instruments_once().await {
                Ok(instruments) => {
                    if attempt > 1 {
                        tracing::info!("Fetched instruments after {} attempts", attempt);
                    }
                    return Ok(instruments);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            "Attempt {}/{} to fetch instruments failed: {}. Retrying in {}ms...",
                            attempt,
                            MAX_RETRIES,
                            e,
                            backoff_ms
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "All retry attempts failed".into()))
    }

    async fn fetch_instruments_once(&self) -> Result<Vec<InstrumentData>> {
        let url = format!("{}/info", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "type": "metaAndAssetCtxs" }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(format!("Hyperliquid API error {}", response.status()).into());
        }

        let (meta, contexts): (Meta, Vec<AssetContext>) = response.json().await?;
        parse_instruments(meta, contexts)
    }
}

#[async_trait]
impl MarketDataSource for HyperliquidClient {
    async fn fetch_instruments(&self) -> Result<Vec<InstrumentData>> {
        self.get_instruments().await
    }
}

fn parse_instruments(meta: Meta, contexts: Vec<AssetContext>) -> Result<Vec<InstrumentData>> {
    if meta.universe.len() != contexts.len() {
        return Err(format!(
            "Universe/context length mismatch: {} vs {}",
            meta.universe.len(),
            contexts.len()
        )
        .into());
    }

    let mut instruments = Vec::with_capacity(contexts.len());
    for (asset, ctx) in meta.universe.into_iter().zip(contexts) {
        if asset.is_delisted {
            continue;
        }

        let name = asset.name.clone();
        match parse_instrument(asset, &ctx) {
            Ok(instrument) => instruments.push(instrument),
            Err(e) => {
                tracing::warn!(instrument = %name, "Skipping asset context with bad number: {}", e);
            }
        }
    }

    Ok(instruments)
}

fn parse_instrument(
    asset: AssetMeta,
    ctx: &AssetContext,
) -> std::result::Result<InstrumentData, ParseFloatError> {
    let price: f64 = ctx.mark_px.parse()?;
    let prev_day: f64 = ctx.prev_day_px.parse()?;
    let change_24h_pct = if prev_day > 0.0 {
        (price - prev_day) / prev_day * 100.0
    } else {
        0.0
    };

    Ok(InstrumentData {
        instrument: asset.name,
        price,
        change_24h_pct,
        volume_24h: ctx.day_ntl_vlm.parse()?,
        funding_rate: ctx.funding.parse()?,
        open_interest: ctx.open_interest.parse()?,
        max_leverage: asset.max_leverage,
    })
}
