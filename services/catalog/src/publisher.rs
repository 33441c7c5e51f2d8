//! Retained republication of the catalog over MQTT.
//!
//! Each instrument type gets its own topic under the configured prefix,
//! carrying a JSON array of that type's records. Messages are retained and
//! sent at QoS 1 so late subscribers pick up the current catalog without
//! waiting for the next refresh.

use crate::source::CatalogRecord;
use rumqttc::{AsyncClient, QoS};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while publishing the catalog
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize catalog for {tipo}: {source}")]
    Serialize {
        tipo: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to publish catalog for {tipo}: {source}")]
    Publish {
        tipo: String,
        #[source]
        source: rumqttc::ClientError,
    },
}

/// Publishes per-type catalog arrays under the configured prefix
pub struct CatalogPublisher {
    client: AsyncClient,
    topic_prefix: String,
}

impl CatalogPublisher {
    pub fn new(client: AsyncClient, topic_prefix: String) -> Self {
        Self {
            client,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Topic for one instrument type
    pub fn topic_for(&self, tipo: &str) -> String {
        format!("{}/{}", self.topic_prefix, sanitize_topic_segment(tipo))
    }

    /// Publish every group, retained at QoS 1. Returns the topic count.
    pub async fn publish_groups(
        &self,
        groups: &BTreeMap<String, Vec<CatalogRecord>>,
    ) -> Result<usize, PublishError> {
        for (tipo, records) in groups {
            let payload = serde_json::to_vec(records).map_err(|source| {
                PublishError::Serialize {
                    tipo: tipo.clone(),
                    source,
                }
            })?;

            let topic = self.topic_for(tipo);
            self.client
                .publish(topic.clone(), QoS::AtLeastOnce, true, payload)
                .await
                .map_err(|source| PublishError::Publish {
                    tipo: tipo.clone(),
                    source,
                })?;

            info!(topic = %topic, records = records.len(), "Catalog group published");
        }

        Ok(groups.len())
    }
}

/// Instrument types come from a free-text legacy column; characters with
/// meaning in topic filters cannot appear in a published topic name
fn sanitize_topic_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '-',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CatalogRecord;
    use rumqttc::MqttOptions;

    fn test_publisher() -> (CatalogPublisher, rumqttc::EventLoop) {
        // The event loop is returned but never polled; publishes only queue
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 16);
        (
            CatalogPublisher::new(client, "alcateia/riodeserto/emcampo/cadastro/".to_string()),
            eventloop,
        )
    }

    #[test]
    fn test_topic_for_type() {
        let (publisher, _eventloop) = test_publisher();
        assert_eq!(
            publisher.topic_for("PP"),
            "alcateia/riodeserto/emcampo/cadastro/PP"
        );
    }

    #[test]
    fn test_topic_sanitizes_filter_characters() {
        let (publisher, _eventloop) = test_publisher();
        assert_eq!(
            publisher.topic_for("PZ/Casagrande"),
            "alcateia/riodeserto/emcampo/cadastro/PZ-Casagrande"
        );
        assert_eq!(sanitize_topic_segment("a+b#c"), "a-b-c");
    }

    #[tokio::test]
    async fn test_publish_groups_queues_each_type() {
        let (publisher, _eventloop) = test_publisher();

        let mut groups = BTreeMap::new();
        groups.insert(
            "PP".to_string(),
            vec![CatalogRecord {
                codigo: "PB-01".to_string(),
                nome: "Piezômetro PB-01".to_string(),
                tipo: "PP".to_string(),
                cota: Some(812.4),
                profundidade: Some(18.0),
            }],
        );
        groups.insert("PZ".to_string(), vec![]);

        let published = publisher.publish_groups(&groups).await.unwrap();
        assert_eq!(published, 2);
    }
}
