//! Sqlite-backed store
//!
//! One pool shared by the vault, the document service and the ledger.
//! Migrations are inline and idempotent; timestamps are stored RFC 3339.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and migrate. `url` is a sqlite connection string such as
    /// `sqlite:clinsign.db?mode=rwc` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting to database: {}", url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database on a single connection. Pooled connections
    /// would each get their own empty memory database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Connect using `DATABASE_URL`, defaulting to a local file.
    pub async fn connect_from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:clinsign.db?mode=rwc".to_string());
        Self::connect(&url).await
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                alias TEXT NOT NULL,
                holder_name TEXT NOT NULL,
                tax_id_json TEXT,
                subject TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                not_after TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                certificate_der BLOB NOT NULL,
                payload BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_certificates_owner
            ON certificates(owner_id)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                consultation_id TEXT NOT NULL,
                professional_id TEXT NOT NULL,
                patient_id TEXT NOT NULL,
                items_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                signature BLOB,
                signature_origin TEXT,
                certificate_subject TEXT,
                certificate_fingerprint TEXT,
                signed_at TEXT,
                document_hash TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_documents_hash
            ON documents(document_hash)
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Migrations complete");
        Ok(())
    }
}
