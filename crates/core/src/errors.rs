use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::FlowTransitionError;
use crate::schema::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Extraction,
    AllocationExhausted,
    DuplicateFolio,
    NotFound,
    Persistence,
    UpstreamCompletion,
    Rendering,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Extraction => "extraction",
            Self::AllocationExhausted => "allocation_exhausted",
            Self::DuplicateFolio => "duplicate_folio",
            Self::NotFound => "not_found",
            Self::Persistence => "persistence",
            Self::UpstreamCompletion => "upstream_completion",
            Self::Rendering => "rendering",
            Self::Internal => "internal",
        }
    }
}

/// Every failure a quotation operation can end in.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuotationError {
    #[error("invalid quotation: {0}")]
    Validation(#[from] ValidationError),
    #[error("completion output is not valid JSON: {0}")]
    Extraction(String),
    #[error("could not allocate a folio after {attempts} attempts (last tried {last_attempt}); choose a folio explicitly")]
    AllocationExhausted { last_attempt: String, attempts: u32 },
    #[error("El folio {folio} ya existe.{}", suggestion_suffix(.suggested_folio))]
    DuplicateFolio { folio: String, suggested_folio: Option<String> },
    #[error("quotation `{quotation_id}` was not found")]
    NotFound { quotation_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("completion engine failure: {0}")]
    UpstreamCompletion(String),
    #[error("rendering failure: {0}")]
    Rendering(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("internal failure: {0}")]
    Internal(String),
}

fn suggestion_suffix(suggested: &Option<String>) -> String {
    match suggested {
        Some(folio) => format!(" El siguiente folio disponible es: {folio}"),
        None => String::new(),
    }
}

impl QuotationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            Self::DuplicateFolio { .. } => ErrorKind::DuplicateFolio,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::UpstreamCompletion(_) => ErrorKind::UpstreamCompletion,
            Self::Rendering(_) => ErrorKind::Rendering,
            Self::FlowTransition(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn suggested_folio(&self) -> Option<&str> {
        match self {
            Self::DuplicateFolio { suggested_folio, .. } => suggested_folio.as_deref(),
            _ => None,
        }
    }

    pub fn to_failure(&self) -> FailureResult {
        FailureResult {
            success: false,
            error_kind: self.kind(),
            error: self.to_string(),
            suggested_folio: self.suggested_folio().map(ToOwned::to_owned),
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let kind = self.kind();
        let message = self.to_string();
        match kind {
            ErrorKind::Validation | ErrorKind::Extraction => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            ErrorKind::NotFound => InterfaceError::NotFound { message, correlation_id },
            ErrorKind::AllocationExhausted | ErrorKind::DuplicateFolio => {
                InterfaceError::Conflict { message, correlation_id }
            }
            ErrorKind::Persistence | ErrorKind::UpstreamCompletion => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            ErrorKind::Rendering | ErrorKind::Internal => {
                InterfaceError::Internal { message, correlation_id }
            }
        }
    }
}

/// Structured failure returned to callers in place of an opaque error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResult {
    pub success: bool,
    pub error_kind: ErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_folio: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested quotation does not exist.",
            Self::Conflict { .. } => "The folio is already in use. Choose another folio.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}
