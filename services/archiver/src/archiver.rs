use crate::classifier::{FlowClassifier, Tag};
use crate::config::ArchiveConfig;
use crate::flow::Flow;
use crate::object_store::{Metadata, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors raised while archiving or reading back flows
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode flows: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode archived flows in {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An object written by [`FlowArchiver::archive`]
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedObject {
    pub tag: Tag,
    pub key: String,
    pub flow_count: usize,
}

/// Persists flows to object storage, keyed by their classification tag
pub struct FlowArchiver {
    classifier: Arc<dyn FlowClassifier>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    /// `config.key_prefix` without surrounding slashes
    key_prefix: String,
    config: ArchiveConfig,
}

impl FlowArchiver {
    pub fn new(
        classifier: Arc<dyn FlowClassifier>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        config: ArchiveConfig,
    ) -> Self {
        let key_prefix = config.key_prefix.trim_matches('/').to_string();

        Self {
            classifier,
            store,
            bucket: bucket.into(),
            key_prefix,
            config,
        }
    }

    /// Key prefix shared by every object of a tag
    pub fn tag_prefix(&self, tag: Tag) -> String {
        if self.key_prefix.is_empty() {
            format!("{tag}/")
        } else {
            format!("{}/{}/", self.key_prefix, tag)
        }
    }

    /// Generate the object key for a batch
    /// Format: {prefix}/{tag}/{date}/{time}_{batch_id}.json
    ///
    /// The time component sorts lexicographically within a day, so listings
    /// under a tag come back in write order.
    pub fn object_key(&self, tag: Tag, at: DateTime<Utc>, batch_id: Uuid) -> String {
        format!(
            "{prefix}{date}/{time}_{batch_id}.json",
            prefix = self.tag_prefix(tag),
            date = at.format("%Y-%m-%d"),
            time = at.format("%H%M%S%3f"),
            batch_id = batch_id,
        )
    }

    /// Classify flows and write one object per tag
    ///
    /// Each result corresponds to one tag group; failures are not retried.
    #[instrument(skip(self, flows), fields(flow_count = flows.len()))]
    pub async fn archive(&self, flows: &[Flow]) -> Vec<Result<ArchivedObject, ArchiveError>> {
        let mut groups: BTreeMap<Tag, Vec<&Flow>> = BTreeMap::new();
        for flow in flows {
            let tag = self.classifier.flow_tag(flow);
            metrics::counter!("flow_archiver_flows_total", "tag" => tag.as_str()).increment(1);
            groups.entry(tag).or_default().push(flow);
        }

        let batch_id = Uuid::new_v4();
        let now = Utc::now();

        let results: Vec<_> = stream::iter(groups)
            .map(|(tag, group)| self.write_group(tag, group, now, batch_id))
            .buffer_unordered(self.config.upload_concurrency.max(1))
            .collect()
            .await;

        let written = results.iter().filter(|r| r.is_ok()).count();
        info!(
            batch_id = %batch_id,
            objects_written = written,
            objects_failed = results.len() - written,
            "Flow batch archived"
        );

        results
    }

    async fn write_group(
        &self,
        tag: Tag,
        flows: Vec<&Flow>,
        at: DateTime<Utc>,
        batch_id: Uuid,
    ) -> Result<ArchivedObject, ArchiveError> {
        let key = self.object_key(tag, at, batch_id);
        let body = serde_json::to_vec(&flows).map_err(ArchiveError::Encode)?;

        let mut metadata = Metadata::new();
        metadata.insert("tag".to_string(), Some(tag.to_string()));
        metadata.insert("flow-count".to_string(), Some(flows.len().to_string()));
        metadata.insert("batch-id".to_string(), Some(batch_id.to_string()));
        metadata.insert(
            "first-start".to_string(),
            flows.iter().map(|f| f.start).min().map(|v| v.to_string()),
        );
        metadata.insert(
            "last-seen".to_string(),
            flows.iter().map(|f| f.last).max().map(|v| v.to_string()),
        );

        debug!(key = %key, size_bytes = body.len(), "Writing flow group");

        let result = self
            .store
            .write_object(
                &self.bucket,
                &key,
                body,
                &self.config.content_type,
                &self.config.content_encoding,
                &metadata,
            )
            .await;

        if let Err(e) = result {
            metrics::counter!("flow_archiver_write_failures_total").increment(1);
            warn!(key = %key, error = %e, "Failed to write flow group");
            return Err(e.into());
        }

        metrics::counter!("flow_archiver_objects_written_total").increment(1);

        Ok(ArchivedObject {
            tag,
            key,
            flow_count: flows.len(),
        })
    }

    /// Read back the flows stored in an archived object
    pub async fn read_archive(&self, key: &str) -> Result<Vec<Flow>, ArchiveError> {
        let body = self.store.read_object(&self.bucket, key).await?;

        serde_json::from_slice(&body).map_err(|source| ArchiveError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// List archived object keys for a tag
    pub async fn list_archives(&self, tag: Tag) -> Result<Vec<String>, ArchiveError> {
        Ok(self
            .store
            .list_objects(&self.bucket, &self.tag_prefix(tag))
            .await?)
    }
}
