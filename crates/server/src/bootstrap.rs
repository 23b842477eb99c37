use std::sync::Arc;

use cotizador_agent::HttpClientFactory;
use cotizador_core::config::{AppConfig, ConfigError, LoadOptions};
use cotizador_db::{
    connect_with_config, migrations, DbPool, SqlQuotationRepository, SqlUserSettingsRepository,
};
use thiserror::Error;
use tracing::info;

use crate::pdf::{QuotationRenderer, RenderError};
use crate::service::QuotationService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<QuotationService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document renderer could not be initialized: {0}")]
    Rendering(#[source] RenderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and wires the quotation service for an already loaded configuration.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let renderer =
        QuotationRenderer::from_config(&config.rendering).map_err(BootstrapError::Rendering)?;
    let service = QuotationService::new(
        Arc::new(SqlQuotationRepository::new(db_pool.clone())),
        Arc::new(SqlUserSettingsRepository::new(db_pool.clone())),
        Arc::new(renderer),
        Arc::new(HttpClientFactory),
        config.llm.clone(),
        config.folio.clone(),
    );

    Ok(Application { config, db_pool, service: Arc::new(service) })
}

#[cfg(test)]
mod tests {
    use cotizador_core::config::{ConfigOverrides, LoadOptions};
    use serde_json::json;

    use crate::bootstrap::bootstrap;
    use crate::service::{FinalizeRequest, RequestContext};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_folio_prefix() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                folio_prefix: Some("CIC-".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("folio.prefix"));
    }

    #[tokio::test]
    async fn bootstrapped_service_finalizes_against_sqlite() {
        let app = bootstrap(valid_overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('quotations', 'user_settings')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected quotation tables after bootstrap");
        assert_eq!(table_count, 2);

        let ctx = RequestContext::new("user-1", "bootstrap-test");
        let candidate = json!({
            "cliente": "Acme",
            "fecha": "2026-03-01",
            "secciones": [{
                "titulo": "Servicios",
                "items": [{ "descripcion": "Consultoría", "cantidad": 5, "precioUnitario": 100 }]
            }]
        });
        let request = FinalizeRequest { candidate, quotation_id: None, instruction: None };

        let first = app.service.finalize(&ctx, request.clone()).await.expect("first finalize");
        let second = app.service.finalize(&ctx, request).await.expect("second finalize");

        assert_eq!(first.folio, "CIC-00001");
        assert_eq!(first.total, "$580.00");
        assert_eq!(second.folio, "CIC-00002");

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                template_dir: Some("does/not/exist".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
