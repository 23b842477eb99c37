use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use cotizador_core::domain::quotation::{
    NewQuotation, QuotationId, QuotationRecord, QuotationStatus, QuotationUpdate, UserId,
};
use cotizador_core::folio::FolioLedger;

use super::{QuotationRepository, RepositoryError, UserSettingsRepository};

/// Insertion-ordered store with the same ownership and uniqueness rules as the SQL one.
#[derive(Default)]
pub struct InMemoryQuotationRepository {
    records: RwLock<Vec<QuotationRecord>>,
}

impl InMemoryQuotationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn folio_taken(
    records: &[QuotationRecord],
    user_id: &UserId,
    folio: &str,
    except: Option<&QuotationId>,
) -> bool {
    records.iter().any(|record| {
        record.user_id == *user_id && record.folio == folio && Some(&record.id) != except
    })
}

#[async_trait::async_trait]
impl FolioLedger for InMemoryQuotationRepository {
    type Error = RepositoryError;

    async fn latest_folio(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|record| record.user_id == *user_id)
            .map(|record| record.folio.clone()))
    }

    async fn folio_exists(&self, user_id: &UserId, folio: &str) -> Result<bool, RepositoryError> {
        let records = self.records.read().await;
        Ok(folio_taken(&records, user_id, folio, None))
    }
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryQuotationRepository {
    async fn find_by_id(
        &self,
        user_id: &UserId,
        id: &QuotationId,
    ) -> Result<Option<QuotationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|record| record.id == *id && record.user_id == *user_id).cloned())
    }

    async fn insert(&self, quotation: NewQuotation) -> Result<QuotationRecord, RepositoryError> {
        let mut records = self.records.write().await;
        if folio_taken(&records, &quotation.user_id, &quotation.folio, None) {
            return Err(RepositoryError::Conflict { folio: quotation.folio });
        }

        let now = Utc::now();
        let record = QuotationRecord {
            id: QuotationId(Uuid::new_v4().to_string()),
            user_id: quotation.user_id,
            folio: quotation.folio,
            cliente: quotation.json_data.cliente.clone(),
            fecha: quotation.json_data.fecha,
            status: QuotationStatus::Draft,
            html: quotation.html,
            json_data: quotation.json_data,
            conversation_history: quotation.conversation_history,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        user_id: &UserId,
        id: &QuotationId,
        update: QuotationUpdate,
    ) -> Result<QuotationRecord, RepositoryError> {
        let mut records = self.records.write().await;
        if folio_taken(&records, user_id, &update.folio, Some(id)) {
            return Err(RepositoryError::Conflict { folio: update.folio });
        }

        let record = records
            .iter_mut()
            .find(|record| record.id == *id && record.user_id == *user_id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;

        record.folio = update.folio;
        record.cliente = update.json_data.cliente.clone();
        record.fecha = update.json_data.fecha;
        record.html = update.html;
        record.json_data = update.json_data;
        record.conversation_history = update.conversation_history;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuotationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|record| record.user_id == *user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserSettingsRepository {
    keys: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl UserSettingsRepository for InMemoryUserSettingsRepository {
    async fn llm_api_key(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let keys = self.keys.read().await;
        Ok(keys.get(&user_id.0).filter(|key| !key.trim().is_empty()).cloned())
    }

    async fn set_llm_api_key(
        &self,
        user_id: &UserId,
        api_key: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut keys = self.keys.write().await;
        match api_key {
            Some(key) => keys.insert(user_id.0.clone(), key),
            None => keys.remove(&user_id.0),
        };
        Ok(())
    }
}
