use std::path::Path;

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

mod branches;
mod deliveries;
mod jobs;
mod projects;
mod types;
mod users;

pub use types::*;

#[derive(Debug, Clone)]
pub struct DbClient {
    pool: Pool<Sqlite>,
}

impl DbClient {
    /// Opens a pool against the SQLite file at `database_url`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let connect_options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    /// Creates the parent directory, connects, and brings the schema up to date.
    ///
    /// # Errors
    /// Returns an error if the directory, connection, or migrations fail.
    pub async fn initialize(database_path: &str) -> Result<Self> {
        if let Some(parent_dir) = Path::new(database_path).parent() {
            std::fs::create_dir_all(parent_dir)?;
        }

        let db = Self::connect(database_path).await?;
        db.run_migrations().await?;
        db.ensure_wal_mode().await?;

        Ok(db)
    }

    /// # Errors
    /// Returns an error if a migration fails to apply.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the journal mode cannot be read or is not WAL.
    pub async fn ensure_wal_mode(&self) -> Result<()> {
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode=WAL;")
            .fetch_one(&self.pool)
            .await?;

        if journal_mode.to_uppercase() != "WAL" {
            bail!("SQLite WAL mode is not enabled");
        }

        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }
}
