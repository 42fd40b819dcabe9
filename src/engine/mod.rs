pub mod admission;
pub mod event_listener;
pub mod orchestrator;
pub mod paper_ledger;
pub mod position_watcher;
pub mod price_monitor;
pub mod trade_executor;

pub use admission::{FilterEngine, PredictionClient};
pub use event_listener::EventListener;
pub use orchestrator::Orchestrator;
pub use paper_ledger::PaperLedger;
pub use position_watcher::PositionWatcher;
pub use price_monitor::PriceMonitor;
pub use trade_executor::TradeExecutor;
