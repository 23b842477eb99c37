use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub const MANAGED_TABLES: [&str; 2] = ["quotations", "user_settings"];

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Names of the migration-managed tables that currently exist, sorted.
pub async fn managed_tables(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    let mut tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await?
            .into_iter()
            .filter(|name: &String| MANAGED_TABLES.contains(&name.as_str()))
            .collect();
    tables.sort();
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{managed_tables, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "quotations",
        "user_settings",
        "idx_quotations_user_created_at",
        "idx_quotations_cliente",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        assert_eq!(table_count(&pool, "quotations").await, 1);
        assert_eq!(table_count(&pool, "user_settings").await, 1);
        assert_eq!(managed_tables(&pool).await.expect("tables"), ["quotations", "user_settings"]);
    }

    #[tokio::test]
    async fn folio_is_unique_per_user_only() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO quotations
            (id, user_id, folio, cliente, fecha, html, json_data, created_at, updated_at)
            VALUES (?, ?, 'CIC-00001', 'Acme', '2026-03-01', '', '{}', '2026-03-01T00:00:00Z',
                    '2026-03-01T00:00:00Z')";

        sqlx::query(insert).bind("q-1").bind("user-a").execute(&pool).await.expect("first");
        sqlx::query(insert).bind("q-2").bind("user-b").execute(&pool).await.expect("other user");
        let duplicate = sqlx::query(insert).bind("q-3").bind("user-a").execute(&pool).await;

        assert!(duplicate.is_err(), "same user and folio must be rejected");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "quotations").await, 0);
        assert_eq!(table_count(&pool, "user_settings").await, 0);
        assert!(managed_tables(&pool).await.expect("tables").is_empty());
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
