//! Thin gateway in front of the invoice artifact bucket.
//!
//! Two operations, no caching: list the bucket, fetch an object. The
//! polling engine is the only consumer. Speaks to AWS S3 proper or to any
//! S3-compatible store (MinIO et al.) via an endpoint override with
//! path-style addressing.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{
    meta::region::RegionProviderChain, timeout::TimeoutConfig,
    BehaviorVersion,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BucketError {
    /// The key is not (or not yet) in the bucket.
    #[error("object '{0}' not found")]
    NotFound(String),
    /// Anything else: connectivity, auth, timeouts, 5xx. Callers treat
    /// these as retryable on their own schedule.
    #[error("object store transport: {0}")]
    Transport(String),
}

/// One entry of a bucket listing. Iteration order is unspecified and may
/// change between calls.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
    pub etag: String,
}

/// The two object-store operations the delivery core consumes. A trait so
/// tests can drive the polling engine against an in-memory bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn list(&self) -> Result<Vec<ObjectInfo>, BucketError>;
    async fn fetch(&self, key: &str) -> Result<Bytes, BucketError>;
}

/// Gateway settings, straight from process config.
#[derive(Clone, Debug)]
pub struct BucketConfig {
    pub bucket: String,
    /// Endpoint override for S3-compatible stores. `None` uses the
    /// ambient AWS endpoint resolution.
    pub endpoint: Option<String>,
    /// Per-operation deadline, including retries.
    pub operation_timeout: Duration,
}

/// The real S3 gateway.
pub struct Bucket {
    client: Client,
    bucket: String,
}

impl Bucket {
    /// Build the SDK client from ambient AWS config plus our overrides and
    /// probe the bucket once. Connection establishment happens exactly
    /// here; a probe failure is a `Transport` error for the caller to
    /// treat as fatal or not, per its retry policy.
    pub async fn connect(config: BucketConfig) -> Result<Self, BucketError> {
        // S3-compatible stores still want a SigV4 region; default one in
        // when the environment provides none.
        let region =
            RegionProviderChain::default_provider().or_else("us-east-1");
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.operation_timeout)
                    .build(),
            );
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // Path-style addressing: S3-compatible stores rarely support the
        // virtual-host style the SDK defaults to.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        let bucket = Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        };
        bucket.probe().await?;
        info!("connected to bucket '{}'", bucket.bucket);
        Ok(bucket)
    }

    async fn probe(&self) -> Result<(), BucketError> {
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| BucketError::Transport(format!("{err}")))
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for Bucket {
    /// Full listing of the bucket, pagination followed to exhaustion.
    async fn list(&self) -> Result<Vec<ObjectInfo>, BucketError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request =
                self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request.send().await.map_err(|err| {
                BucketError::Transport(format!("list_objects_v2: {err}"))
            })?;

            for object in response.contents() {
                // A listing entry without a key is nothing we can ever
                // fetch; skip rather than invent one.
                let Some(key) = object.key() else { continue };
                objects.push(ObjectInfo {
                    key: key.to_owned(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .map(|dt| dt.to_string())
                        .unwrap_or_default(),
                    etag: object.e_tag().unwrap_or_default().to_owned(),
                });
            }

            continuation = if response.is_truncated() == Some(true) {
                response.next_continuation_token().map(str::to_owned)
            } else {
                None
            };
            if continuation.is_none() {
                break;
            }
        }

        debug!("listed {} objects in '{}'", objects.len(), self.bucket);
        Ok(objects)
    }

    /// Fetch the full object bytes.
    async fn fetch(&self, key: &str) -> Result<Bytes, BucketError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    BucketError::NotFound(key.to_owned())
                } else {
                    BucketError::Transport(format!("get_object: {err}"))
                }
            })?;

        response
            .body
            .collect()
            .await
            .map(|data| data.into_bytes())
            .map_err(|err| {
                BucketError::Transport(format!("get_object body: {err}"))
            })
    }
}
