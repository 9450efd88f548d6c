pub mod readiness;
pub mod scheduler;
pub mod subgraph;
pub mod watermark;

pub use readiness::{readiness, ReadySignal, ReadyWaiter};
pub use scheduler::{IngestionScheduler, PassReport, Phase};
pub use subgraph::{HourDataSource, SubgraphClient};
pub use watermark::WatermarkTracker;
