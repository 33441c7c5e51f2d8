//! Wire types for the reading and photo streams.
//!
//! The inbound shapes mirror what the field app publishes: a full
//! reading-batch snapshot grouped by category under a top-level `Campo`
//! object, and per-photo payloads keyed by reading id. Category-specific
//! measurement fields are opaque to the bridge and carried through a
//! flattened passthrough map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Raw payload fields that must never appear in the outbound document.
const EMBEDDED_PHOTO_FIELDS: &[&str] = &["fotoBase64", "local_arquivo_foto"];

/// Full snapshot of current field readings, grouped by category name.
///
/// Replaced wholesale on each reading-batch event; there is no incremental
/// merge of two batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingBatch {
    /// Category name -> ordered readings
    #[serde(rename = "Campo")]
    pub campo: BTreeMap<String, Vec<Reading>>,
    /// Top-level fields other than `Campo`, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReadingBatch {
    /// Total number of readings across all categories
    pub fn reading_count(&self) -> usize {
        self.campo.values().map(Vec::len).sum()
    }
}

/// One field inspection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Unique identifier, stable across the reading and photo streams
    pub id: String,
    /// Site/point label, e.g. "PB-02 - Sensor"
    #[serde(default)]
    pub poco: String,
    /// Free-text comment; may be empty or missing
    #[serde(default)]
    pub observacao: Option<String>,
    /// Category-specific measurement fields, opaque to the bridge
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reading {
    /// Point code: the text before the first " - " in the site label.
    pub fn point_code(&self) -> &str {
        self.poco.split(" - ").next().unwrap_or("").trim()
    }
}

/// Per-photo wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoEnvelope {
    /// Transport-encoded image bytes
    #[serde(rename = "fotoBase64")]
    pub foto_base64: String,
}

/// A reading batch after reconciliation, ready for outbound delivery.
///
/// Same category structure as the input batch, 1:1 reading correspondence,
/// order preserved within each category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedDocument {
    #[serde(rename = "Campo")]
    pub campo: BTreeMap<String, Vec<MergedReading>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MergedDocument {
    pub fn reading_count(&self) -> usize {
        self.campo.values().map(Vec::len).sum()
    }
}

/// One reading augmented with its resolved photo reference.
///
/// `observacao` and `foto` are serialized even when null so the outbound
/// shape is uniform across readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedReading {
    pub id: String,
    pub poco: String,
    /// Normalized comment: blank/whitespace-only collapsed to null
    pub observacao: Option<String>,
    /// Resolved photo reference: local path, public URL, or null
    pub foto: Option<String>,
    /// Passthrough measurement fields, embedded photo payloads stripped
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Blank or whitespace-only comments collapse to null; anything else passes
/// through verbatim, untrimmed.
pub fn normalize_comment(raw: Option<&str>) -> Option<String> {
    match raw {
        Some(s) if !s.trim().is_empty() => Some(s.to_string()),
        _ => None,
    }
}

/// Remove raw embedded photo payload fields from a passthrough map.
pub fn strip_embedded_photo_fields(extra: &mut Map<String, Value>) {
    for field in EMBEDDED_PHOTO_FIELDS {
        extra.remove(*field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_reading_batch() {
        let json = r#"{
            "Campo": {
                "PP": [
                    {"id": "5", "poco": "PB-02 - Sensor", "observacao": "", "leitura": 12.5}
                ],
                "PZ": [
                    {"id": "7", "poco": "PZ-11 - Montante", "nivel": 3.2}
                ]
            },
            "enviadoEm": "2024-03-01T12:00:00Z"
        }"#;

        let batch: ReadingBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.reading_count(), 2);
        assert_eq!(batch.campo["PP"][0].id, "5");
        assert_eq!(batch.campo["PP"][0].extra["leitura"], 12.5);
        assert_eq!(batch.campo["PZ"][0].observacao, None);
        assert_eq!(batch.extra["enviadoEm"], "2024-03-01T12:00:00Z");
    }

    #[test]
    fn test_point_code() {
        let reading = Reading {
            id: "5".to_string(),
            poco: "PB-02 - Sensor".to_string(),
            observacao: None,
            extra: Map::new(),
        };
        assert_eq!(reading.point_code(), "PB-02");

        let bare = Reading {
            id: "6".to_string(),
            poco: "PZ-11".to_string(),
            observacao: None,
            extra: Map::new(),
        };
        assert_eq!(bare.point_code(), "PZ-11");
    }

    #[test]
    fn test_photo_envelope_field_name() {
        let envelope: PhotoEnvelope =
            serde_json::from_str(r#"{"fotoBase64": "SGVsbG8="}"#).unwrap();
        assert_eq!(envelope.foto_base64, "SGVsbG8=");
    }

    #[test]
    fn test_normalize_comment() {
        assert_eq!(normalize_comment(Some("  ")), None);
        assert_eq!(normalize_comment(Some("")), None);
        assert_eq!(normalize_comment(None), None);
        assert_eq!(normalize_comment(Some("ok")), Some("ok".to_string()));
        // verbatim, untrimmed
        assert_eq!(normalize_comment(Some(" ok ")), Some(" ok ".to_string()));
    }

    #[test]
    fn test_strip_embedded_photo_fields() {
        let mut extra = Map::new();
        extra.insert("fotoBase64".to_string(), Value::String("QUJD".to_string()));
        extra.insert(
            "local_arquivo_foto".to_string(),
            Value::String("/tmp/x.jpg".to_string()),
        );
        extra.insert("leitura".to_string(), Value::from(1.5));

        strip_embedded_photo_fields(&mut extra);

        assert!(!extra.contains_key("fotoBase64"));
        assert!(!extra.contains_key("local_arquivo_foto"));
        assert_eq!(extra["leitura"], 1.5);
    }

    #[test]
    fn test_merged_reading_serializes_nulls() {
        let merged = MergedReading {
            id: "5".to_string(),
            poco: "PB-02 - Sensor".to_string(),
            observacao: None,
            foto: None,
            extra: Map::new(),
        };

        let value = serde_json::to_value(&merged).unwrap();
        assert!(value.get("observacao").unwrap().is_null());
        assert!(value.get("foto").unwrap().is_null());
    }
}
