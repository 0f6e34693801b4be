pub mod engine;
pub mod error;
pub mod provider;
pub mod replay;

pub use engine::{
    ApplyConfig, MissingItem, PassEngine, PassHooks, PassOutcome, PassReport, PassState,
};
pub use error::{ApplyError, ApplyResult};
pub use provider::{ListEntry, LiveListProvider};
pub use replay::ReplayListProvider;
