use chrono::Utc;

use cotizador_core::domain::quotation::UserId;

use super::{RepositoryError, UserSettingsRepository};
use crate::DbPool;

pub struct SqlUserSettingsRepository {
    pool: DbPool,
}

impl SqlUserSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserSettingsRepository for SqlUserSettingsRepository {
    async fn llm_api_key(&self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let key = sqlx::query_scalar::<_, Option<String>>(
            "SELECT llm_api_key FROM user_settings WHERE user_id = ?",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?
        .flatten()
        .filter(|key| !key.trim().is_empty());

        Ok(key)
    }

    async fn set_llm_api_key(
        &self,
        user_id: &UserId,
        api_key: Option<String>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_settings (user_id, llm_api_key, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                llm_api_key = excluded.llm_api_key,
                updated_at = excluded.updated_at",
        )
        .bind(&user_id.0)
        .bind(api_key.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cotizador_core::domain::quotation::UserId;

    use super::SqlUserSettingsRepository;
    use crate::repositories::UserSettingsRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn api_key_upsert_and_clear() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlUserSettingsRepository::new(pool);
        let user = UserId("user-1".to_string());

        assert_eq!(repo.llm_api_key(&user).await.expect("read empty"), None);

        repo.set_llm_api_key(&user, Some("key-a".to_string())).await.expect("set");
        repo.set_llm_api_key(&user, Some("key-b".to_string())).await.expect("overwrite");
        assert_eq!(repo.llm_api_key(&user).await.expect("read"), Some("key-b".to_string()));

        repo.set_llm_api_key(&user, Some("   ".to_string())).await.expect("blank");
        assert_eq!(repo.llm_api_key(&user).await.expect("read blank"), None);

        repo.set_llm_api_key(&user, None).await.expect("clear");
        assert_eq!(repo.llm_api_key(&user).await.expect("read cleared"), None);
    }
}
