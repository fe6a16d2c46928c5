// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::RateConfig;
use crate::models::Currency;
use crate::money::round_rate;

/// A rate as reported by an external source: VES per one unit of `currency`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedRate {
    pub currency: Currency,
    pub rate: Decimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// An external provider of exchange rates
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<FetchedRate>>;
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("Mozilla/5.0")
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    rates: HashMap<String, Decimal>,
}

/// USD and EUR against VES from ExchangeRate-API
pub struct ExchangeRateApiClient {
    client: Client,
    base_url: String,
}

impl ExchangeRateApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn latest(&self, base: Currency) -> Result<Decimal> {
        let url = format!("{}/latest/{}", self.base_url, base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to get response text")?;
        if !status.is_success() {
            anyhow::bail!("API request failed ({}): {}", status, text);
        }

        parse_latest_ves(&text).with_context(|| format!("Failed to parse rates for {}", base))
    }
}

pub(crate) fn parse_latest_ves(body: &str) -> Result<Decimal> {
    let parsed: LatestRatesResponse = serde_json::from_str(body)?;
    let rate = parsed
        .rates
        .get("VES")
        .copied()
        .context("Response has no VES rate")?;
    if rate <= Decimal::ZERO {
        anyhow::bail!("VES rate is not positive: {}", rate);
    }
    Ok(round_rate(rate))
}

#[async_trait]
impl RateSource for ExchangeRateApiClient {
    fn name(&self) -> &str {
        "exchangerate_api"
    }

    async fn fetch(&self) -> Result<Vec<FetchedRate>> {
        let mut rates = Vec::new();
        for currency in [Currency::Usd, Currency::Eur] {
            let rate = self.latest(currency).await?;
            rates.push(FetchedRate {
                currency,
                rate,
                source: self.name().to_string(),
                fetched_at: crate::db::now(),
            });
        }
        Ok(rates)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct P2pSearchRequest<'a> {
    asset: &'a str,
    fiat: &'a str,
    merchant_check: bool,
    page: u32,
    pay_types: Vec<String>,
    publisher_type: Option<String>,
    rows: usize,
    trade_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct P2pSearchResponse {
    #[serde(default)]
    data: Vec<P2pAdvertEntry>,
}

#[derive(Debug, Deserialize)]
struct P2pAdvertEntry {
    adv: P2pAdvert,
}

#[derive(Debug, Deserialize)]
struct P2pAdvert {
    price: Decimal,
}

/// USDT against VES from the Binance P2P advert board
pub struct BinanceP2pClient {
    client: Client,
    url: String,
    sample_size: usize,
}

impl BinanceP2pClient {
    pub fn new(url: impl Into<String>, sample_size: usize) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
            sample_size: sample_size.max(1),
        })
    }
}

/// Average of the first `sample_size` advertised prices
pub(crate) fn parse_p2p_average(body: &str, sample_size: usize) -> Result<Decimal> {
    let parsed: P2pSearchResponse = serde_json::from_str(body)?;
    let prices: Vec<Decimal> = parsed
        .data
        .iter()
        .take(sample_size)
        .map(|entry| entry.adv.price)
        .filter(|price| *price > Decimal::ZERO)
        .collect();

    if prices.is_empty() {
        anyhow::bail!("No P2P adverts found");
    }

    let sum: Decimal = prices.iter().sum();
    Ok(round_rate(sum / Decimal::from(prices.len())))
}

#[async_trait]
impl RateSource for BinanceP2pClient {
    fn name(&self) -> &str {
        "binance_p2p"
    }

    async fn fetch(&self) -> Result<Vec<FetchedRate>> {
        let payload = P2pSearchRequest {
            asset: "USDT",
            fiat: "VES",
            merchant_check: false,
            page: 1,
            pay_types: Vec::new(),
            publisher_type: None,
            rows: self.sample_size,
            trade_type: "BUY",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to get response text")?;
        if !status.is_success() {
            anyhow::bail!("API request failed ({}): {}", status, text);
        }

        let rate = parse_p2p_average(&text, self.sample_size)?;
        Ok(vec![FetchedRate {
            currency: Currency::Usdt,
            rate,
            source: self.name().to_string(),
            fetched_at: crate::db::now(),
        }])
    }
}

/// The sources queried on every refresh, in priority order
pub fn default_sources(config: &RateConfig) -> Result<Vec<Box<dyn RateSource>>> {
    Ok(vec![
        Box::new(ExchangeRateApiClient::new(&config.exchange_rate_api_url)?),
        Box::new(BinanceP2pClient::new(&config.binance_p2p_url, config.binance_sample_size)?),
    ])
}
