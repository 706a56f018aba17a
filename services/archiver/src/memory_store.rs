//! In-memory object store
//!
//! Stand-in for an S3-compatible backend in tests and local runs. Listing is
//! paged like `ListObjectsV2`, so callers see the same multi-request
//! enumeration they would against a real service.

use crate::object_store::{
    collect_pages, KeyPage, Metadata, ObjectStore, StoreError, StoredObject,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Backend-side failures reported by the in-memory store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryBackendError {
    #[error("NoSuchBucket: the specified bucket does not exist")]
    NoSuchBucket,

    #[error("NoSuchKey: the specified key does not exist")]
    NoSuchKey,
}

const DEFAULT_PAGE_SIZE: usize = 1000;

type Bucket = BTreeMap<String, StoredObject>;

pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<String, Bucket>>,
    page_size: usize,
    list_requests: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            list_requests: AtomicUsize::new(0),
        }
    }

    /// Limit the number of keys returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Number of listing pages served so far
    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::Relaxed)
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<KeyPage, StoreError> {
        self.list_requests.fetch_add(1, Ordering::Relaxed);

        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| {
            StoreError::backend("ListObjectsV2", bucket, prefix, MemoryBackendError::NoSuchBucket)
        })?;

        // The continuation token is the last key of the previous page
        let lower = match token {
            Some(ref last) => Bound::Excluded(last.as_str()),
            None => Bound::Included(prefix),
        };

        let mut matching = objects
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next_token = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(last.clone()),
            _ => None,
        };

        Ok(KeyPage { keys, next_token })
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: &str,
        metadata: &Metadata,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        let objects = buckets.get_mut(bucket).ok_or_else(|| {
            StoreError::backend("PutObject", bucket, key, MemoryBackendError::NoSuchBucket)
        })?;

        let object = StoredObject {
            body,
            content_type: Some(content_type.to_string()),
            content_encoding: (!content_encoding.is_empty()).then(|| content_encoding.to_string()),
            metadata: metadata
                .iter()
                .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
                .collect(),
        };

        objects.insert(key.to_string(), object);
        Ok(())
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| {
            StoreError::backend("GetObject", bucket, key, MemoryBackendError::NoSuchBucket)
        })?;

        objects.get(key).cloned().ok_or_else(|| {
            StoreError::backend("GetObject", bucket, key, MemoryBackendError::NoSuchKey)
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        collect_pages(|token| {
            let page = self.list_page(bucket, prefix, token);
            async move { page }
        })
        .await
    }
}
