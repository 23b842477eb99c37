use thiserror::Error;
use tracing::debug;

use crate::flows::states::{FinalizeEvent, FinalizeState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FinalizeState, event: FinalizeEvent },
}

pub fn transition(
    current: FinalizeState,
    event: &FinalizeEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FinalizeEvent::{
        CandidateValidated, DocumentRendered, Failed, FolioResolved, RecordPersisted,
        ResultReturned,
    };
    use FinalizeState as S;

    let to = match (current, event) {
        (S::Received, CandidateValidated) => S::Validated,
        (S::Validated, FolioResolved) => S::FolioResolved,
        (S::FolioResolved, DocumentRendered) => S::Rendered,
        (S::Rendered, RecordPersisted) => S::Persisted,
        (S::Persisted, ResultReturned) => S::Done,
        (state, Failed { .. }) if !state.is_terminal() => S::Rejected,
        (state, event) => {
            return Err(FlowTransitionError::InvalidTransition { state, event: event.clone() })
        }
    };

    Ok(TransitionOutcome { from: current, to, event: event.clone() })
}

/// Tracks one finalize request through its states.
#[derive(Clone, Debug)]
pub struct FinalizeFlow {
    correlation_id: String,
    state: FinalizeState,
    history: Vec<TransitionOutcome>,
}

impl FinalizeFlow {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            state: FinalizeState::Received,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> FinalizeState {
        self.state
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// States entered so far, in order. `Received` is implied.
    pub fn visited_states(&self) -> Vec<FinalizeState> {
        self.history.iter().map(|step| step.to).collect()
    }

    pub fn apply(&mut self, event: FinalizeEvent) -> Result<FinalizeState, FlowTransitionError> {
        let outcome = transition(self.state, &event)?;
        debug!(
            event_name = "finalize.transition",
            correlation_id = %self.correlation_id,
            from = ?outcome.from,
            to = ?outcome.to,
            "finalize state advanced"
        );
        self.state = outcome.to;
        self.history.push(outcome);
        Ok(self.state)
    }

    /// Moves to `Rejected`; a flow that already ended keeps its state.
    pub fn reject(&mut self, kind: &str) -> FinalizeState {
        if !self.state.is_terminal() {
            let _ = self.apply(FinalizeEvent::Failed { kind: kind.to_string() });
        }
        self.state
    }
}
