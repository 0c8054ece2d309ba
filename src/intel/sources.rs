//! Market-intelligence and price inputs.
//!
//! Each signal source reports one raw factor value. HTTP sources expect a JSON
//! body of the form `{ "value": <number> }`; price feeds expect
//! `{ "price": <number or string> }`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::models::SignalFactor;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(3);

/// Producer of one raw factor value.
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    fn factor(&self) -> SignalFactor;

    fn fetch(&self) -> BoxFuture<'_, Result<f64>>;
}

/// Producer of the current base/quote price.
pub trait PriceFeed: Send + Sync {
    fn fetch_price(&self) -> BoxFuture<'_, Result<Decimal>>;
}

#[derive(Debug, Deserialize)]
struct ValueResponse {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// GET `url` and decode JSON, retrying transport and 5xx failures with
/// exponential backoff. 4xx responses and bad bodies fail immediately.
async fn get_json<T>(client: &Client, url: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
        .build();

    backoff::future::retry(policy, move || async move {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::Error::new(e).context("Request failed")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Request to {} failed: {} - {}", url, status, body);
            return Err(if status.is_server_error() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| backoff::Error::permanent(anyhow::Error::new(e).context("Failed to parse response")))
    })
    .await
}

/// Factor value read from an HTTP endpoint.
pub struct HttpSignalSource {
    name: String,
    factor: SignalFactor,
    url: String,
    client: Client,
}

impl HttpSignalSource {
    pub fn new(name: impl Into<String>, factor: SignalFactor, url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            factor,
            url: url.into(),
            client: build_client()?,
        })
    }
}

impl SignalSource for HttpSignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn factor(&self) -> SignalFactor {
        self.factor
    }

    fn fetch(&self) -> BoxFuture<'_, Result<f64>> {
        async move {
            debug!(source = %self.name, url = %self.url, "Fetching signal factor");
            let body: ValueResponse = get_json(&self.client, &self.url).await?;
            Ok(body.value)
        }
        .boxed()
    }
}

/// Fixed factor value, for dry runs and tests.
#[derive(Debug, Clone)]
pub struct StaticSignalSource {
    name: String,
    factor: SignalFactor,
    value: f64,
}

impl StaticSignalSource {
    pub fn new(name: impl Into<String>, factor: SignalFactor, value: f64) -> Self {
        Self {
            name: name.into(),
            factor,
            value,
        }
    }

    /// One source per factor, each at its neutral value.
    pub fn neutral_set() -> Vec<Arc<dyn SignalSource>> {
        SignalFactor::ALL
            .iter()
            .map(|f| Arc::new(Self::new(format!("static-{}", f.as_str()), *f, f.neutral())) as Arc<dyn SignalSource>)
            .collect()
    }
}

impl SignalSource for StaticSignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn factor(&self) -> SignalFactor {
        self.factor
    }

    fn fetch(&self) -> BoxFuture<'_, Result<f64>> {
        futures::future::ready(Ok(self.value)).boxed()
    }
}

/// Price read from an HTTP endpoint.
pub struct HttpPriceFeed {
    url: String,
    client: Client,
}

impl HttpPriceFeed {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: build_client()?,
        })
    }
}

impl PriceFeed for HttpPriceFeed {
    fn fetch_price(&self) -> BoxFuture<'_, Result<Decimal>> {
        async move {
            let body: PriceResponse = get_json(&self.client, &self.url).await?;
            if body.price <= Decimal::ZERO {
                anyhow::bail!("Price feed returned non-positive price {}", body.price);
            }
            Ok(body.price)
        }
        .boxed()
    }
}

/// Fixed price, for dry runs and tests.
#[derive(Debug, Clone)]
pub struct StaticPriceFeed {
    price: Decimal,
}

impl StaticPriceFeed {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

impl PriceFeed for StaticPriceFeed {
    fn fetch_price(&self) -> BoxFuture<'_, Result<Decimal>> {
        futures::future::ready(Ok(self.price)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_static_sources() {
        let sources = StaticSignalSource::neutral_set();
        assert_eq!(sources.len(), SignalFactor::ALL.len());
        for source in &sources {
            let value = tokio_test::block_on(source.fetch()).unwrap();
            assert_eq!(value, source.factor().neutral());
        }

        let feed = StaticPriceFeed::new(dec!(101.5));
        assert_eq!(tokio_test::block_on(feed.fetch_price()).unwrap(), dec!(101.5));
    }

    #[test]
    fn test_response_shapes() {
        let v: ValueResponse = serde_json::from_str(r#"{"value": 0.25}"#).unwrap();
        assert_eq!(v.value, 0.25);

        let p: PriceResponse = serde_json::from_str(r#"{"price": "42.10"}"#).unwrap();
        assert_eq!(p.price, dec!(42.10));
    }

    #[tokio::test]
    async fn test_http_source_unreachable_fails() {
        let source = HttpSignalSource::new("down", SignalFactor::Momentum, "http://127.0.0.1:9/value").unwrap();
        assert!(source.fetch().await.is_err());
    }
}
