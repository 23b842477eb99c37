pub mod engine;
pub mod states;

pub use engine::{FinalizeFlow, FlowTransitionError};
pub use states::{FinalizeEvent, FinalizeState, TransitionOutcome};
