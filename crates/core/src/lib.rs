pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod folio;
pub mod pricing;
pub mod schema;

pub use domain::quotation::{
    append_history, Item, NewQuotation, QuotationId, QuotationInput, QuotationRecord,
    QuotationStatus, QuotationUpdate, Section, UserId,
};
pub use errors::{ErrorKind, FailureResult, InterfaceError, QuotationError};
pub use flows::{FinalizeEvent, FinalizeFlow, FinalizeState, FlowTransitionError};
pub use folio::{
    increment_folio, next_folio, AllocationError, FolioAllocation, FolioAllocator, FolioLedger,
    FolioSequence,
};
pub use pricing::{compute, format_currency, price_quotation, ProcessedQuotation, QuotationTotals};
pub use schema::{validate, ValidationError, ValidationErrorKind};
