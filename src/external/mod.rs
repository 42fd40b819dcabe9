pub mod market_data;
pub mod oracle;
pub mod prediction;
pub mod swap;

pub use market_data::{HttpMarketDataProvider, MarketData, MarketDataProvider};
pub use oracle::{DiscoverResult, HttpPriceOracle, PriceOracle, QuoteBatchMiss};
pub use prediction::{HttpPredictionService, PredictionService};
pub use swap::{HttpSwapBackend, SwapBackend, SwapDirection, SwapOutcome};
