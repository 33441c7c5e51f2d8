//! Catalog rows from the legacy relational source.
//!
//! Text columns come back as raw bytes because the legacy schema stores
//! Windows-1252; the decode adapter turns them into proper strings before
//! anything downstream sees them.

use crate::config::DatabaseConfig;
use crate::legacy_text::decode_legacy;
use serde::Serialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument};

/// Errors that can occur while reading the catalog
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("failed to connect to catalog database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("catalog query failed: {0}")]
    Query(#[source] sqlx::Error),
}

/// One instrument in the published catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    /// Instrument code, e.g. "PB-02"
    pub codigo: String,
    /// Display name
    pub nome: String,
    /// Instrument type; also the final topic segment on republication
    pub tipo: String,
    /// Top-of-casing elevation in meters
    pub cota: Option<f64>,
    /// Installed depth in meters
    pub profundidade: Option<f64>,
}

/// Read-only view of the legacy catalog table
pub struct CatalogSource {
    pool: MySqlPool,
}

impl CatalogSource {
    /// Connect to the legacy database with an explicit acquire timeout
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(SourceError::Connect)?;

        info!("Connected to catalog database");

        Ok(Self { pool })
    }

    /// Fetch the full catalog, decoding legacy text columns
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<Vec<CatalogRecord>, SourceError> {
        let rows = sqlx::query(
            r#"
            SELECT codigo, nome, tipo, cota, profundidade
            FROM piezometros
            ORDER BY codigo
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SourceError::Query)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let codigo: Vec<u8> = row.try_get("codigo").map_err(SourceError::Query)?;
            let nome: Vec<u8> = row.try_get("nome").map_err(SourceError::Query)?;
            let tipo: Vec<u8> = row.try_get("tipo").map_err(SourceError::Query)?;
            let cota: Option<f64> = row.try_get("cota").map_err(SourceError::Query)?;
            let profundidade: Option<f64> =
                row.try_get("profundidade").map_err(SourceError::Query)?;

            records.push(CatalogRecord {
                codigo: decode_legacy(&codigo),
                nome: decode_legacy(&nome),
                tipo: decode_legacy(&tipo),
                cota,
                profundidade,
            });
        }

        info!(records = records.len(), "Catalog fetched");

        Ok(records)
    }
}

/// Group catalog records by instrument type, preserving per-type row order
pub fn group_by_type(records: Vec<CatalogRecord>) -> BTreeMap<String, Vec<CatalogRecord>> {
    let mut groups: BTreeMap<String, Vec<CatalogRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.tipo.clone()).or_default().push(record);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(codigo: &str, tipo: &str) -> CatalogRecord {
        CatalogRecord {
            codigo: codigo.to_string(),
            nome: format!("Instrumento {}", codigo),
            tipo: tipo.to_string(),
            cota: Some(812.4),
            profundidade: None,
        }
    }

    #[test]
    fn test_group_by_type() {
        let groups = group_by_type(vec![
            record("PB-01", "PP"),
            record("PZ-07", "PZ"),
            record("PB-02", "PP"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["PP"].len(), 2);
        assert_eq!(groups["PP"][0].codigo, "PB-01");
        assert_eq!(groups["PP"][1].codigo, "PB-02");
        assert_eq!(groups["PZ"][0].codigo, "PZ-07");
    }

    #[test]
    fn test_record_serialization_shape() {
        let value = serde_json::to_value(record("PB-01", "PP")).unwrap();
        assert_eq!(value["codigo"], "PB-01");
        assert_eq!(value["cota"], 812.4);
        assert!(value["profundidade"].is_null());
    }
}
