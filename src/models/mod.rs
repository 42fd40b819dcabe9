pub mod events;
pub mod mindmap;
pub mod position;

pub use events::{ActorTrade, ActorTradeUpdate, MindmapUpdate, TradeData};
pub use mindmap::{
    ActorConnection, FilterMetrics, FilterResult, FilterSignal, MindmapSnapshot, NetworkMetrics,
    PredictionOutcome, TradeKind,
};
pub use position::{Position, PositionStatus, SellConditions};
