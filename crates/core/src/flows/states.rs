use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeState {
    Received,
    Validated,
    FolioResolved,
    Rendered,
    Persisted,
    Done,
    Rejected,
}

impl FinalizeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeEvent {
    CandidateValidated,
    FolioResolved,
    DocumentRendered,
    RecordPersisted,
    ResultReturned,
    Failed { kind: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FinalizeState,
    pub to: FinalizeState,
    pub event: FinalizeEvent,
}
