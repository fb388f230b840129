//! # Engine Schema Installation
//!
//! Applies the bundled engine migrations (tables and `tonga_*` functions) to a
//! database. Migrations are embedded in the binary and tracked in
//! `tonga_schema_migrations`, so installing is idempotent.
//!
//! ## Concurrency Control
//!
//! Several processes may try to install at start-up. The installer holds a
//! session-level advisory lock on one dedicated connection for the whole run:
//!
//! ```sql
//! SELECT pg_advisory_lock(7305674171560711521);
//! -- apply outstanding migrations, one transaction each
//! SELECT pg_advisory_unlock(7305674171560711521);
//! ```

use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{Result, TongaError};

/// Advisory lock key reserved for schema installation
const LOCK_KEY: i64 = 7_305_674_171_560_711_521;

/// Migrations shipped with the crate, keyed by file name (`YYYYMMDDHHMMSS_name.sql`)
const BUNDLED_MIGRATIONS: &[(&str, &str)] = &[(
    "20240601000000_tonga_engine.sql",
    include_str!("../migrations/20240601000000_tonga_engine.sql"),
)];

/// Represents a single engine migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    /// SQL applied by the migration
    pub sql: &'static str,
}

/// Installs and inspects the engine schema
pub struct SchemaInstaller;

impl SchemaInstaller {
    /// Every bundled migration in version order
    pub fn migrations() -> Result<Vec<Migration>> {
        let mut migrations = BUNDLED_MIGRATIONS
            .iter()
            .map(|&(filename, sql)| {
                let stem = filename.strip_suffix(".sql").unwrap_or(filename);
                let (version, name) = Self::parse_migration_filename(stem).ok_or_else(|| {
                    TongaError::migration(format!("malformed migration file name: {filename}"))
                })?;
                Ok(Migration { version, name, sql })
            })
            .collect::<Result<Vec<_>>>()?;

        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }

    /// Apply outstanding migrations; returns the versions applied by this call
    pub async fn install(pool: &PgPool) -> Result<Vec<String>> {
        let migrations = Self::migrations()?;
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn, &migrations).await;

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let applied = result?;
        if applied.is_empty() {
            debug!("Tonga schema already up to date");
        } else {
            info!(versions = ?applied, "Tonga schema installed");
        }
        Ok(applied)
    }

    /// Whether every bundled migration has been applied
    pub async fn is_installed(pool: &PgPool) -> Result<bool> {
        let table_exists = sqlx::query_scalar::<_, bool>(
            "SELECT to_regclass('tonga_schema_migrations') IS NOT NULL",
        )
        .fetch_one(pool)
        .await?;

        if !table_exists {
            return Ok(false);
        }

        let applied: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT version FROM tonga_schema_migrations")
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect();

        Ok(Self::migrations()?
            .iter()
            .all(|migration| applied.contains(&migration.version)))
    }

    async fn apply_outstanding(
        conn: &mut PoolConnection<Postgres>,
        migrations: &[Migration],
    ) -> Result<Vec<String>> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS tonga_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
        "#,
        )
        .execute(&mut **conn)
        .await?;

        let already_applied: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT version FROM tonga_schema_migrations")
                .fetch_all(&mut **conn)
                .await?
                .into_iter()
                .collect();

        let mut applied = Vec::new();
        for migration in migrations {
            if already_applied.contains(&migration.version) {
                continue;
            }

            info!(
                "Applying migration: {} - {}",
                migration.version, migration.name
            );

            let mut tx = conn.begin().await?;
            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    TongaError::migration(format!("{} failed: {e}", migration.version))
                })?;
            sqlx::query("INSERT INTO tonga_schema_migrations (version, name) VALUES ($1, $2)")
                .bind(&migration.version)
                .bind(&migration.name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            applied.push(migration.version.clone());
        }

        Ok(applied)
    }

    /// Parse migration filename to extract version and name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        // Expected format: YYYYMMDDHHMMSS_migration_name
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);

        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part.strip_prefix('_')?.replace('_', " ");
        if name.is_empty() {
            return None;
        }

        Some((version_part.to_string(), name))
    }
}
