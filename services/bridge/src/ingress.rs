//! Inbound message classification and decoding.
//!
//! Every MQTT publish lands here. Topics are classified into exactly one of
//! reading-batch, photo (the final topic segment carries the reading id), or
//! ignored. The bridge's own publications are filtered by prefix so a broker
//! echo can never feed back into the merge buffer. Malformed JSON is logged
//! and dropped without touching buffer state.

use crate::config::TopicsConfig;
use crate::model::{PhotoEnvelope, ReadingBatch};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while decoding inbound payloads
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON payload on {topic}: {source}")]
    Json {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A classified, decoded inbound event
#[derive(Debug, Clone)]
pub enum IngressEvent {
    /// A full reading-batch snapshot
    Readings(ReadingBatch),
    /// A photo payload for one reading
    Photo {
        reading_id: String,
        payload: PhotoEnvelope,
    },
}

/// Outcome of topic classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Readings,
    Photo { reading_id: String },
    Ignored,
}

/// Classifies inbound topics against the configured layout
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    readings: String,
    photos_prefix: String,
    publish_prefix: String,
}

impl TopicClassifier {
    pub fn new(topics: &TopicsConfig) -> Self {
        Self {
            readings: topics.readings.clone(),
            photos_prefix: topics.photos_prefix.trim_end_matches('/').to_string(),
            publish_prefix: topics.publish_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Classify a topic into exactly one inbound kind.
    ///
    /// The own-publication check runs first: anything under the publish
    /// prefix is ignored regardless of shape.
    pub fn classify(&self, topic: &str) -> Classification {
        if !self.publish_prefix.is_empty() && topic.starts_with(self.publish_prefix.as_str()) {
            return Classification::Ignored;
        }

        if topic == self.readings {
            return Classification::Readings;
        }

        if let Some(rest) = topic.strip_prefix(self.photos_prefix.as_str()) {
            if let Some(tail) = rest.strip_prefix('/') {
                let reading_id = tail.rsplit('/').next().unwrap_or("");
                if !reading_id.is_empty() {
                    return Classification::Photo {
                        reading_id: reading_id.to_string(),
                    };
                }
            }
        }

        Classification::Ignored
    }

    /// MQTT subscription filters covering the inbound topic family
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.readings.clone(), format!("{}/#", self.photos_prefix)]
    }
}

/// Message ingress: classification plus JSON decoding into [`IngressEvent`]
pub struct Ingress {
    classifier: TopicClassifier,
}

impl Ingress {
    pub fn new(topics: &TopicsConfig) -> Self {
        Self {
            classifier: TopicClassifier::new(topics),
        }
    }

    pub fn classifier(&self) -> &TopicClassifier {
        &self.classifier
    }

    /// Classify and decode one inbound publish.
    ///
    /// Returns `None` for ignored topics and malformed payloads; the latter
    /// are logged at warn. No error propagates past this point.
    pub fn accept(&self, topic: &str, payload: &[u8]) -> Option<IngressEvent> {
        match self.classifier.classify(topic) {
            Classification::Readings => match self.decode::<ReadingBatch>(topic, payload) {
                Ok(batch) => {
                    debug!(topic = %topic, readings = batch.reading_count(), "Received reading batch");
                    metrics::counter!("bridge.ingress.readings").increment(1);
                    Some(IngressEvent::Readings(batch))
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed reading batch");
                    metrics::counter!("bridge.ingress.malformed").increment(1);
                    None
                }
            },
            Classification::Photo { reading_id } => {
                match self.decode::<PhotoEnvelope>(topic, payload) {
                    Ok(envelope) => {
                        debug!(topic = %topic, reading_id = %reading_id, "Received photo payload");
                        metrics::counter!("bridge.ingress.photos").increment(1);
                        Some(IngressEvent::Photo {
                            reading_id,
                            payload: envelope,
                        })
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed photo payload");
                        metrics::counter!("bridge.ingress.malformed").increment(1);
                        None
                    }
                }
            }
            Classification::Ignored => {
                debug!(topic = %topic, "Ignoring unrelated topic");
                metrics::counter!("bridge.ingress.ignored").increment(1);
                None
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<T, DecodeError> {
        serde_json::from_slice(payload).map_err(|source| DecodeError::Json {
            topic: topic.to_string(),
            source,
        })
    }
}
