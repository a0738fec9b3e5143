pub mod engine;
pub mod indicators;
pub mod store;

pub use engine::{IndicatorConfig, IndicatorEngine, SnapshotPair};
pub use store::{BarStore, TimeframeSeries};
