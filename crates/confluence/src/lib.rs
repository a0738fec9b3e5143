pub mod config;
pub mod scorer;
pub mod screener;
pub mod weights;

pub use config::ScorerConfig;
pub use scorer::{ConfluenceScorer, SymbolInputs, TimeframeData};
pub use screener::{ScreenResult, Screener};
pub use weights::IndexWeightTable;
