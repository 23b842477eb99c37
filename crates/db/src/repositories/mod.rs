use async_trait::async_trait;
use thiserror::Error;

use cotizador_core::domain::quotation::{
    NewQuotation, QuotationId, QuotationRecord, QuotationUpdate, UserId,
};
use cotizador_core::folio::FolioLedger;

pub mod memory;
pub mod quotation;
pub mod settings;

pub use memory::{InMemoryQuotationRepository, InMemoryUserSettingsRepository};
pub use quotation::SqlQuotationRepository;
pub use settings::SqlUserSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("folio `{folio}` already exists for this user")]
    Conflict { folio: String },
    #[error("quotation `{0}` was not found")]
    NotFound(QuotationId),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Quotation store. Every method is scoped to the owning user; records owned by someone else
/// behave as if they did not exist. Inserts and updates report a folio already used by the same
/// user as [`RepositoryError::Conflict`].
#[async_trait]
pub trait QuotationRepository: FolioLedger<Error = RepositoryError> + Send + Sync {
    async fn find_by_id(
        &self,
        user_id: &UserId,
        id: &QuotationId,
    ) -> Result<Option<QuotationRecord>, RepositoryError>;

    async fn insert(&self, quotation: NewQuotation) -> Result<QuotationRecord, RepositoryError>;

    async fn update(
        &self,
        user_id: &UserId,
        id: &QuotationId,
        update: QuotationUpdate,
    ) -> Result<QuotationRecord, RepositoryError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuotationRecord>, RepositoryError>;
}

#[async_trait]
pub trait UserSettingsRepository: Send + Sync {
    async fn llm_api_key(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError>;

    async fn set_llm_api_key(
        &self,
        user_id: &UserId,
        api_key: Option<String>,
    ) -> Result<(), RepositoryError>;
}
