//! Read-through cache over the signal sources.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::models::{MarketSignal, SignalFactor};

use super::SignalSource;

/// Fetch every source concurrently and assemble a signal.
///
/// Each read is bounded by `timeout`. A failed, late or out-of-range read is
/// replaced by the factor's value in `previous`, or by its neutral value when
/// there is none. Several sources for one factor are averaged. Never fails.
pub async fn fetch_signal(
    sources: &[Arc<dyn SignalSource>],
    timeout: Duration,
    previous: Option<&MarketSignal>,
    now: DateTime<Utc>,
) -> MarketSignal {
    let reads = sources.iter().map(|source| async move {
        let outcome = match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(Ok(value)) => source
                .factor()
                .validate(value)
                .map_err(|e| e.to_string()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
        };
        (source, outcome)
    });

    let mut sums = [0.0_f64; 4];
    let mut counts = [0_usize; 4];
    for (source, outcome) in join_all(reads).await {
        let idx = factor_index(source.factor());
        match outcome {
            Ok(value) => {
                sums[idx] += value;
                counts[idx] += 1;
            }
            Err(reason) => {
                let err = EngineError::DataUnavailable {
                    factor: source.factor().as_str().to_string(),
                    reason,
                };
                warn!(source = %source.name(), error = %err, "Signal source failed, using fallback");
            }
        }
    }

    let resolve = |factor: SignalFactor| {
        let idx = factor_index(factor);
        if counts[idx] > 0 {
            sums[idx] / counts[idx] as f64
        } else {
            previous.map_or_else(|| factor.neutral(), |p| p.factor(factor))
        }
    };

    // Every resolved value is already in range.
    MarketSignal::new(
        resolve(SignalFactor::Sentiment),
        resolve(SignalFactor::Impact),
        resolve(SignalFactor::PriceStrength),
        resolve(SignalFactor::Momentum),
        now,
    )
    .unwrap_or_else(|_| MarketSignal::neutral(now))
}

fn factor_index(factor: SignalFactor) -> usize {
    match factor {
        SignalFactor::Sentiment => 0,
        SignalFactor::Impact => 1,
        SignalFactor::PriceStrength => 2,
        SignalFactor::Momentum => 3,
    }
}

/// Signal cache with a time-to-live and a single refresher.
pub struct MarketIntelCache {
    sources: Vec<Arc<dyn SignalSource>>,
    ttl: chrono::Duration,
    fetch_timeout: Duration,
    current: RwLock<Option<MarketSignal>>,
    refresh: Mutex<()>,
}

impl MarketIntelCache {
    pub fn new(sources: Vec<Arc<dyn SignalSource>>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            sources,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            fetch_timeout,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Last signal stored, fresh or not.
    pub async fn peek(&self) -> Option<MarketSignal> {
        *self.current.read().await
    }

    fn is_fresh(&self, signal: &MarketSignal, now: DateTime<Utc>) -> bool {
        now - signal.observed_at < self.ttl
    }

    /// Signal for `now`. Fresh values are returned without fetching. When
    /// stale, one caller refreshes; concurrent callers get the previous value
    /// instead of waiting, unless there is none yet.
    pub async fn get(&self, now: DateTime<Utc>) -> MarketSignal {
        let cached = self.peek().await;
        if let Some(signal) = &cached {
            if self.is_fresh(signal, now) {
                return *signal;
            }
        }

        let _guard = match self.refresh.try_lock() {
            Ok(guard) => guard,
            Err(_) => match cached {
                Some(stale) => {
                    debug!("Signal refresh in progress, serving previous value");
                    return stale;
                }
                None => self.refresh.lock().await,
            },
        };

        // Another caller may have refreshed while we waited.
        let previous = self.peek().await;
        if let Some(signal) = &previous {
            if self.is_fresh(signal, now) {
                return *signal;
            }
        }

        let signal = fetch_signal(&self.sources, self.fetch_timeout, previous.as_ref(), now).await;
        debug!(
            market_score = signal.market_score(),
            sources = self.sources.len(),
            "Market signal refreshed"
        );
        *self.current.write().await = Some(signal);
        signal
    }
}
