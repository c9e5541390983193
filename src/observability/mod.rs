pub mod history;
pub mod metrics;

pub use history::{QueryHistory, QueryLogEntry};
pub use metrics::{EngineStats, StatsSnapshot};
