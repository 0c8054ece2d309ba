//! Market intelligence: signal sources, price feeds and the signal cache.

mod cache;
mod sources;

pub use cache::MarketIntelCache;
pub use sources::{
    HttpPriceFeed, HttpSignalSource, PriceFeed, SignalSource, StaticPriceFeed, StaticSignalSource,
};
