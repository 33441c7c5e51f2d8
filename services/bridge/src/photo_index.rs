//! Durable record of saved photos in the legacy database.
//!
//! Best-effort: the insert failing never blocks a reading's inclusion in
//! the outbound document. Deployments without the legacy database simply
//! leave `database` unset and this store is never constructed.

use crate::config::DatabaseConfig;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur in the photo record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to photo record database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to record photo {filename}: {source}")]
    Insert {
        filename: String,
        #[source]
        source: sqlx::Error,
    },
}

/// MySQL-backed photo record store
pub struct PhotoIndex {
    pool: MySqlPool,
}

impl PhotoIndex {
    /// Connect to the legacy database with an explicit acquire timeout
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Connected to photo record database");

        Ok(Self { pool })
    }

    /// Insert one photo record: point code, derived filename, and where the
    /// bytes were written (local path or public URL)
    pub async fn record_photo(
        &self,
        point: &str,
        filename: &str,
        location: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fotos_inspecoes (ponto, arquivo, local, criado_em)
            VALUES (?, ?, ?, NOW())
            "#,
        )
        .bind(point)
        .bind(filename)
        .bind(location)
        .execute(&self.pool)
        .await
        .map_err(|source| StoreError::Insert {
            filename: filename.to_string(),
            source,
        })?;

        debug!(point = %point, filename = %filename, "Photo recorded");
        metrics::counter!("bridge.photos.recorded").increment(1);

        Ok(())
    }
}
