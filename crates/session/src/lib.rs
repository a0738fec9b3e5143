pub mod live;
pub mod pipeline;
pub mod state;

pub use live::{LiveSession, SessionCommand};
pub use pipeline::DecisionPipeline;
pub use state::{CycleInput, SessionConfig, SessionState, SessionStateMachine};
