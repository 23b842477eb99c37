use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use cotizador_core::domain::quotation::{
    NewQuotation, QuotationId, QuotationInput, QuotationRecord, QuotationStatus, QuotationUpdate,
    UserId,
};
use cotizador_core::folio::FolioLedger;

use super::{QuotationRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        id,
        user_id,
        folio,
        cliente,
        fecha,
        status,
        html,
        json_data,
        conversation_history,
        created_at,
        updated_at
     FROM quotations";

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FolioLedger for SqlQuotationRepository {
    type Error = RepositoryError;

    async fn latest_folio(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let folio = sqlx::query_scalar::<_, String>(
            "SELECT folio
             FROM quotations
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folio)
    }

    async fn folio_exists(&self, user_id: &UserId, folio: &str) -> Result<bool, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM quotations WHERE user_id = ? AND folio = ?",
        )
        .bind(&user_id.0)
        .bind(folio)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(
        &self,
        user_id: &UserId,
        id: &QuotationId,
    ) -> Result<Option<QuotationRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ? AND user_id = ?"))
            .bind(&id.0)
            .bind(&user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(quotation_from_row).transpose()
    }

    async fn insert(&self, quotation: NewQuotation) -> Result<QuotationRecord, RepositoryError> {
        let now = Utc::now().trunc_subsecs(6);
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
        let json_data = encode_json_data(&record.json_data)?;

        sqlx::query(
            "INSERT INTO quotations (
                id,
                user_id,
                folio,
                cliente,
                fecha,
                status,
                html,
                json_data,
                conversation_history,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.user_id.0)
        .bind(&record.folio)
        .bind(&record.cliente)
        .bind(record.fecha.format("%Y-%m-%d").to_string())
        .bind(record.status.as_str())
        .bind(&record.html)
        .bind(json_data)
        .bind(record.conversation_history.as_deref())
        .bind(format_timestamp(record.created_at))
        .bind(format_timestamp(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|error| map_write_error(error, &record.folio))?;

        Ok(record)
    }

    async fn update(
        &self,
        user_id: &UserId,
        id: &QuotationId,
        update: QuotationUpdate,
    ) -> Result<QuotationRecord, RepositoryError> {
        let json_data = encode_json_data(&update.json_data)?;

        let result = sqlx::query(
            "UPDATE quotations
             SET folio = ?,
                 cliente = ?,
                 fecha = ?,
                 html = ?,
                 json_data = ?,
                 conversation_history = ?,
                 updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&update.folio)
        .bind(&update.json_data.cliente)
        .bind(update.json_data.fecha.format("%Y-%m-%d").to_string())
        .bind(&update.html)
        .bind(json_data)
        .bind(update.conversation_history.as_deref())
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .bind(&user_id.0)
        .execute(&self.pool)
        .await
        .map_err(|error| map_write_error(error, &update.folio))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.clone()));
        }

        self.find_by_id(user_id, id).await?.ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuotationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(quotation_from_row).collect()
    }
}

fn map_write_error(error: sqlx::Error, folio: &str) -> RepositoryError {
    let unique_violation = error
        .as_database_error()
        .map(|database_error| database_error.is_unique_violation())
        .unwrap_or(false);

    if unique_violation {
        RepositoryError::Conflict { folio: folio.to_string() }
    } else {
        RepositoryError::Database(error)
    }
}

fn encode_json_data(input: &QuotationInput) -> Result<String, RepositoryError> {
    serde_json::to_string(input)
        .map_err(|error| RepositoryError::Decode(format!("could not encode json_data: {error}")))
}

fn quotation_from_row(row: SqliteRow) -> Result<QuotationRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = QuotationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown quotation status `{status_raw}`"))
    })?;

    let json_raw = row.try_get::<String, _>("json_data")?;
    let json_data = serde_json::from_str::<QuotationInput>(&json_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid json_data: {error}")))?;

    let fecha_raw = row.try_get::<String, _>("fecha")?;
    let fecha = NaiveDate::parse_from_str(&fecha_raw, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `fecha`: `{fecha_raw}` ({error})"))
    })?;

    Ok(QuotationRecord {
        id: QuotationId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        folio: row.try_get("folio")?,
        cliente: row.try_get("cliente")?,
        fecha,
        status,
        html: row.try_get("html")?,
        json_data,
        conversation_history: row.try_get("conversation_history")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use cotizador_core::domain::quotation::{
        Item, NewQuotation, QuotationId, QuotationInput, QuotationStatus, QuotationUpdate, Section,
        UserId,
    };
    use cotizador_core::folio::FolioLedger;

    use super::SqlQuotationRepository;
    use crate::migrations;
    use crate::repositories::{QuotationRepository, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_input(cliente: &str) -> QuotationInput {
        QuotationInput {
            cliente: cliente.to_string(),
            fecha: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
            folio: None,
            secciones: vec![Section {
                titulo: "Servicios".to_string(),
                items: vec![Item {
                    clave: "CONS-01".to_string(),
                    descripcion: "Consultoría".to_string(),
                    cantidad: Decimal::new(5, 0),
                    precio_unitario: Decimal::new(10050, 2),
                }],
            }],
            notas: Some(vec!["Vigencia 15 días".to_string()]),
        }
    }

    fn new_quotation(user: &str, folio: &str) -> NewQuotation {
        NewQuotation {
            user_id: UserId(user.to_string()),
            folio: folio.to_string(),
            html: "<html></html>".to_string(),
            json_data: sample_input("Acme").with_folio(folio),
            conversation_history: None,
        }
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_record() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let user = UserId("user-1".to_string());

        let inserted = repo.insert(new_quotation("user-1", "CIC-00001")).await.expect("insert");
        let found = repo.find_by_id(&user, &inserted.id).await.expect("find");

        assert_eq!(found.as_ref().map(|record| record.folio.as_str()), Some("CIC-00001"));
        let found = found.expect("record");
        assert_eq!(found.status, QuotationStatus::Draft);
        assert_eq!(found.cliente, "Acme");
        assert_eq!(found.json_data, inserted.json_data);
    }

    #[tokio::test]
    async fn reads_are_scoped_to_owner() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let inserted = repo.insert(new_quotation("owner", "CIC-00001")).await.expect("insert");
        let intruder = UserId("intruder".to_string());

        assert!(repo.find_by_id(&intruder, &inserted.id).await.expect("find").is_none());
        assert!(!repo.folio_exists(&intruder, "CIC-00001").await.expect("exists"));
        assert_eq!(repo.latest_folio(&intruder).await.expect("latest"), None);
    }

    #[tokio::test]
    async fn latest_folio_follows_creation_order() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let user = UserId("user-1".to_string());

        repo.insert(new_quotation("user-1", "CIC-00007")).await.expect("insert first");
        repo.insert(new_quotation("user-1", "CIC-00003")).await.expect("insert second");

        assert_eq!(repo.latest_folio(&user).await.expect("latest"), Some("CIC-00003".to_string()));
        assert!(repo.folio_exists(&user, "CIC-00007").await.expect("exists"));
    }

    #[tokio::test]
    async fn duplicate_folio_is_reported_as_conflict() {
        let repo = SqlQuotationRepository::new(setup_pool().await);

        repo.insert(new_quotation("user-1", "CIC-00001")).await.expect("insert");
        let error = repo
            .insert(new_quotation("user-1", "CIC-00001"))
            .await
            .expect_err("duplicate must fail");

        assert!(matches!(error, RepositoryError::Conflict { ref folio } if folio == "CIC-00001"));
        repo.insert(new_quotation("user-2", "CIC-00001")).await.expect("other user may reuse");
    }

    #[tokio::test]
    async fn update_overwrites_document_and_denormalized_columns() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let user = UserId("user-1".to_string());
        let inserted = repo.insert(new_quotation("user-1", "CIC-00001")).await.expect("insert");

        let updated = repo
            .update(
                &user,
                &inserted.id,
                QuotationUpdate {
                    folio: "CIC-00001".to_string(),
                    html: "<html>v2</html>".to_string(),
                    json_data: sample_input("Globex").with_folio("CIC-00001"),
                    conversation_history: Some("cambia cliente".to_string()),
                },
            )
            .await
            .expect("update");

        assert_eq!(updated.cliente, "Globex");
        assert_eq!(updated.html, "<html>v2</html>");
        assert_eq!(updated.created_at, inserted.created_at);
        assert!(updated.updated_at >= inserted.updated_at);
        assert_eq!(updated.conversation_history.as_deref(), Some("cambia cliente"));
    }

    #[tokio::test]
    async fn update_of_foreign_record_is_not_found() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let inserted = repo.insert(new_quotation("owner", "CIC-00001")).await.expect("insert");

        let error = repo
            .update(
                &UserId("intruder".to_string()),
                &inserted.id,
                QuotationUpdate {
                    folio: "CIC-00001".to_string(),
                    html: String::new(),
                    json_data: sample_input("Acme"),
                    conversation_history: None,
                },
            )
            .await
            .expect_err("foreign update must fail");

        assert!(matches!(error, RepositoryError::NotFound(QuotationId(ref id)) if *id == inserted.id.0));
    }

    #[tokio::test]
    async fn list_for_user_returns_newest_first() {
        let repo = SqlQuotationRepository::new(setup_pool().await);
        let user = UserId("user-1".to_string());
        for folio in ["CIC-00001", "CIC-00002", "CIC-00003"] {
            repo.insert(new_quotation("user-1", folio)).await.expect("insert");
        }
        repo.insert(new_quotation("user-2", "CIC-00009")).await.expect("insert other");

        let folios: Vec<String> = repo
            .list_for_user(&user, 2)
            .await
            .expect("list")
            .into_iter()
            .map(|record| record.folio)
            .collect();

        assert_eq!(folios, vec!["CIC-00003".to_string(), "CIC-00002".to_string()]);
    }
}
