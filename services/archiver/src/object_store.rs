use crate::config::ObjectStoreConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// User metadata attached to an object; `None` values are not sent
pub type Metadata = HashMap<String, Option<String>>;

/// Errors returned by object store operations
///
/// The backend error is kept as the source, unmodified; callers decide
/// whether to retry, drop or escalate.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} failed for {bucket}/{key}: {source}")]
    Backend {
        operation: &'static str,
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to read body of {bucket}/{key}: {source}")]
    Body {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn backend(
        operation: &'static str,
        bucket: &str,
        key: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        StoreError::Backend {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// An object read back from the store, fully buffered in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// One page of a key listing
#[derive(Debug, Clone, Default)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Token to request the following page, `None` on the last page
    pub next_token: Option<String>,
}

/// Bucket/key addressed blob storage
///
/// Implementations hold no cache and perform no retries. Objects are read
/// whole, so they must fit in memory.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `key`, replacing any existing object
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: &str,
        metadata: &Metadata,
    ) -> Result<(), StoreError>;

    /// Fetch an object with its content headers and user metadata
    async fn fetch_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError>;

    /// Fetch the body of an object
    async fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(self.fetch_object(bucket, key).await?.body)
    }

    /// List every key under `prefix`, in backend order
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Drive a paginated listing to completion
///
/// `fetch_page` receives the continuation token of the previous page (`None`
/// for the first request). Keys are returned in the order pages arrive.
pub async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<String>, StoreError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<KeyPage, StoreError>>,
{
    let mut keys = Vec::new();
    let mut token = None;

    loop {
        let page = fetch_page(token.take()).await?;
        keys.extend(page.keys);

        match page.next_token {
            Some(next) => token = Some(next),
            None => return Ok(keys),
        }
    }
}

/// Object store backed by an S3-compatible service
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a client for the configured endpoint with static credentials
    pub async fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "flow-archiver",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = S3ConfigBuilder::from(&aws_config)
            .endpoint_url(&config.endpoint)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            endpoint = %config.endpoint,
            region = %config.region,
            path_style = config.force_path_style,
            "S3 object store initialized"
        );

        Self {
            client: S3Client::from_conf(s3_config),
        }
    }

    #[cfg(test)]
    fn from_client(client: S3Client) -> Self {
        Self { client }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<KeyPage, StoreError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| StoreError::backend("ListObjectsV2", bucket, prefix, e))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(String::from))
            .collect();

        let next_token = match response.is_truncated() {
            Some(true) => response.next_continuation_token().map(String::from),
            _ => None,
        };

        Ok(KeyPage { keys, next_token })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body, metadata), fields(size_bytes = body.len()))]
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: &str,
        metadata: &Metadata,
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type);

        if !content_encoding.is_empty() {
            request = request.content_encoding(content_encoding);
        }

        for (name, value) in metadata {
            if let Some(value) = value {
                request = request.metadata(name, value);
            }
        }

        request
            .send()
            .await
            .map_err(|e| StoreError::backend("PutObject", bucket, key, e))?;

        debug!("Object written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::backend("GetObject", bucket, key, e))?;

        let content_type = response.content_type().map(String::from);
        let content_encoding = response.content_encoding().map(String::from);
        let metadata = response.metadata().cloned().unwrap_or_default();

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Body {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?
            .into_bytes()
            .to_vec();

        debug!(size_bytes = body.len(), "Object read");

        Ok(StoredObject {
            body,
            content_type,
            content_encoding,
            metadata,
        })
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys = collect_pages(|token| self.list_page(bucket, prefix, token)).await?;

        debug!(count = keys.len(), "Objects listed");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
    use aws_sdk_s3::operation::put_object::PutObjectOutput;
    use aws_sdk_s3::types::error::NoSuchKey;
    use aws_sdk_s3::types::Object;
    use aws_smithy_mocks::{mock, mock_client, RuleMode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn listing(keys: &[&str], truncated: bool, next_token: Option<&str>) -> ListObjectsV2Output {
        let mut output = ListObjectsV2Output::builder()
            .is_truncated(truncated)
            .set_next_continuation_token(next_token.map(String::from));
        for key in keys {
            output = output.contents(Object::builder().key(*key).build());
        }
        output.build()
    }

    #[tokio::test]
    async fn test_s3_put_omits_empty_encoding_and_unset_metadata() {
        let put = mock!(S3Client::put_object)
            .match_requests(|req| {
                let metadata = req.metadata().cloned().unwrap_or_default();
                req.bucket() == Some("flows")
                    && req.key() == Some("flows/egress/a.json")
                    && req.content_type() == Some("application/json")
                    && req.content_encoding().is_none()
                    && metadata.len() == 1
                    && metadata.get("tag").map(String::as_str) == Some("egress")
            })
            .then_output(|| PutObjectOutput::builder().build());
        let store = S3ObjectStore::from_client(mock_client!(aws_sdk_s3, [&put]));

        let mut metadata = Metadata::new();
        metadata.insert("tag".to_string(), Some("egress".to_string()));
        metadata.insert("first-start".to_string(), None);

        store
            .write_object(
                "flows",
                "flows/egress/a.json",
                b"[]".to_vec(),
                "application/json",
                "",
                &metadata,
            )
            .await
            .unwrap();

        assert_eq!(put.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_s3_put_sends_content_encoding() {
        let put = mock!(S3Client::put_object)
            .match_requests(|req| req.content_encoding() == Some("gzip"))
            .then_output(|| PutObjectOutput::builder().build());
        let store = S3ObjectStore::from_client(mock_client!(aws_sdk_s3, [&put]));

        store
            .write_object("flows", "k", vec![0x1f, 0x8b], "application/json", "gzip", &Metadata::new())
            .await
            .unwrap();

        assert_eq!(put.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_s3_list_follows_continuation_token() {
        let first = mock!(S3Client::list_objects_v2)
            .match_requests(|req| {
                req.prefix() == Some("flows/egress/") && req.continuation_token().is_none()
            })
            .then_output(|| listing(&["flows/egress/a", "flows/egress/b"], true, Some("t1")));
        let second = mock!(S3Client::list_objects_v2)
            .match_requests(|req| req.continuation_token() == Some("t1"))
            // A token on a non-truncated page must not be followed
            .then_output(|| listing(&["flows/egress/c"], false, Some("stale")));
        let store = S3ObjectStore::from_client(mock_client!(
            aws_sdk_s3,
            RuleMode::MatchAny,
            [&first, &second]
        ));

        let keys = store.list_objects("flows", "flows/egress/").await.unwrap();

        assert_eq!(keys, vec!["flows/egress/a", "flows/egress/b", "flows/egress/c"]);
        assert_eq!(first.num_calls(), 1);
        assert_eq!(second.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_s3_get_returns_body_and_headers() {
        let get = mock!(S3Client::get_object)
            .match_requests(|req| req.bucket() == Some("flows") && req.key() == Some("k"))
            .then_output(|| {
                GetObjectOutput::builder()
                    .body(ByteStream::from_static(b"[{\"UUID\":\"f1\"}]"))
                    .content_type("application/json")
                    .content_encoding("identity")
                    .metadata("tag", "internal")
                    .build()
            });
        let store = S3ObjectStore::from_client(mock_client!(aws_sdk_s3, [&get]));

        let object = store.fetch_object("flows", "k").await.unwrap();

        assert_eq!(object.body, b"[{\"UUID\":\"f1\"}]");
        assert_eq!(object.content_type.as_deref(), Some("application/json"));
        assert_eq!(object.content_encoding.as_deref(), Some("identity"));
        assert_eq!(object.metadata.get("tag").map(String::as_str), Some("internal"));
    }

    #[tokio::test]
    async fn test_s3_get_error_is_passed_through() {
        let get = mock!(S3Client::get_object)
            .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let store = S3ObjectStore::from_client(mock_client!(aws_sdk_s3, [&get]));

        let err = store.read_object("flows", "absent").await.unwrap_err();

        match err {
            StoreError::Backend { operation, bucket, key, source } => {
                assert_eq!(operation, "GetObject");
                assert_eq!(bucket, "flows");
                assert_eq!(key, "absent");
                let sdk_error = source
                    .downcast_ref::<aws_sdk_s3::error::SdkError<GetObjectError>>()
                    .expect("source is the SDK error");
                assert!(sdk_error.as_service_error().is_some_and(|e| e.is_no_such_key()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_collect_pages_follows_tokens() {
        let pages = Mutex::new(VecDeque::from(vec![
            KeyPage {
                keys: vec!["a".to_string(), "b".to_string()],
                next_token: Some("t1".to_string()),
            },
            KeyPage {
                keys: vec![],
                next_token: Some("t2".to_string()),
            },
            KeyPage {
                keys: vec!["c".to_string()],
                next_token: None,
            },
        ]));
        let seen_tokens = Mutex::new(Vec::new());

        let keys = collect_pages(|token| {
            seen_tokens.lock().unwrap().push(token);
            let page = pages.lock().unwrap().pop_front().unwrap();
            async move { Ok::<_, StoreError>(page) }
        })
        .await
        .unwrap();

        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(
            *seen_tokens.lock().unwrap(),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_error() {
        let mut calls = 0;

        let result = collect_pages(|_token| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Ok(KeyPage {
                        keys: vec!["a".to_string()],
                        next_token: Some("t1".to_string()),
                    })
                } else {
                    Err(StoreError::backend("ListObjectsV2", "bucket", "prefix", "access denied"))
                }
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Backend { operation: "ListObjectsV2", .. })));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_backend_error_keeps_source() {
        let err = StoreError::backend("PutObject", "flows", "flows/egress/x.json", "NoSuchBucket");

        assert_eq!(
            err.to_string(),
            "PutObject failed for flows/flows/egress/x.json: NoSuchBucket"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "NoSuchBucket");
    }
}
