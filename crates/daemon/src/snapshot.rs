//! Snapshot bridge: camera capture, upload to object storage, signed URL.
//!
//! A URL is only produced after the upload has completed. A failed URL
//! signing can leave an unlinked object behind; it never yields a URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::DownstreamError;
use crate::metrics::{SNAPSHOT_ERR, SNAPSHOT_OK};

const CAMERA: &str = "camera endpoint";
const JPEG: &str = "image/jpeg";

#[async_trait]
pub trait CameraClient: Send + Sync {
    async fn capture(&self, cam_id: &str) -> Result<Bytes, DownstreamError>;
}

/// `GET {base_url}/camera/snapshot/{cam_id}?format=jpeg`.
#[derive(Debug, Clone)]
pub struct HttpCameraClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCameraClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// `{base_url}/camera/snapshot/{cam_id}?format=jpeg` with `cam_id`
    /// percent-encoded as a single path segment.
    fn snapshot_url(&self, cam_id: &str) -> Result<reqwest::Url, DownstreamError> {
        let invalid = |message: String| DownstreamError::Transport {
            service: CAMERA,
            message,
        };
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["camera", "snapshot", cam_id]);
        url.query_pairs_mut().append_pair("format", "jpeg");
        Ok(url)
    }
}

#[async_trait]
impl CameraClient for HttpCameraClient {
    async fn capture(&self, cam_id: &str) -> Result<Bytes, DownstreamError> {
        let url = self.snapshot_url(cam_id)?;
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownstreamError::from_reqwest(CAMERA, self.timeout, e))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(DownstreamError::Status {
                service: CAMERA,
                status: resp.status().as_u16(),
            });
        }

        resp.bytes()
            .await
            .map_err(|e| DownstreamError::from_reqwest(CAMERA, self.timeout, e))
    }
}

/// Object storage used to persist snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &'static str)
        -> Result<(), DownstreamError>;

    /// Time-limited GET URL for an uploaded object.
    async fn signed_url(&self, key: &str, expiry: Duration) -> Result<String, DownstreamError>;
}

fn storage_err(operation: &'static str) -> impl FnOnce(object_store::Error) -> DownstreamError {
    move |e| DownstreamError::Storage {
        operation,
        message: e.to_string(),
    }
}

/// S3-compatible bucket (AWS, MinIO, ...).
#[derive(Debug)]
pub struct S3SnapshotStore {
    store: AmazonS3,
}

impl S3SnapshotStore {
    /// Builds the client from `config`; credentials come from the standard
    /// `AWS_*` environment variables.
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .with_context(|| format!("configure S3 bucket {}", config.bucket))?;
        Ok(Self { store })
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &'static str,
    ) -> Result<(), DownstreamError> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&ObjectPath::from(key), PutPayload::from(data), opts)
            .await
            .map_err(storage_err("put"))?;
        Ok(())
    }

    async fn signed_url(&self, key: &str, expiry: Duration) -> Result<String, DownstreamError> {
        let url = self
            .store
            .signed_url(http::Method::GET, &ObjectPath::from(key), expiry)
            .await
            .map_err(storage_err("sign"))?;
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub data: Bytes,
    pub content_type: &'static str,
}

/// In-process store for local runs and tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    objects: RwLock<HashMap<String, StoredSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredSnapshot> {
        self.objects.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &'static str,
    ) -> Result<(), DownstreamError> {
        self.objects
            .write()
            .insert(key.to_string(), StoredSnapshot { data, content_type });
        Ok(())
    }

    async fn signed_url(&self, key: &str, expiry: Duration) -> Result<String, DownstreamError> {
        if !self.objects.read().contains_key(key) {
            return Err(DownstreamError::Storage {
                operation: "sign",
                message: format!("object not found: {key}"),
            });
        }
        Ok(format!(
            "memory://localhost/{key}?expires={}&signature=mock",
            expiry.as_secs()
        ))
    }
}

/// Object key for a snapshot: `{cmd_id}/{cam_id}_{timestamp}.jpg`.
pub fn snapshot_key(cmd_id: &str, cam_id: &str, captured_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}_{}.jpg",
        sanitize_component(cmd_id),
        sanitize_component(cam_id),
        captured_at.format("%Y-%m-%dT%H:%M:%S")
    )
}

/// Keeps an id inside a single path segment.
fn sanitize_component(s: &str) -> String {
    let cleaned = s.replace([':', '/', '\\'], "_");
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

pub struct SnapshotBridge {
    camera: Arc<dyn CameraClient>,
    store: Arc<dyn SnapshotStore>,
    url_ttl: Duration,
}

impl SnapshotBridge {
    pub fn new(camera: Arc<dyn CameraClient>, store: Arc<dyn SnapshotStore>, url_ttl: Duration) -> Self {
        Self {
            camera,
            store,
            url_ttl,
        }
    }

    /// Captures from `cam_id`, uploads under the task's namespace and
    /// returns a signed URL for the uploaded object.
    pub async fn capture(&self, cmd_id: &str, cam_id: &str) -> Result<String, DownstreamError> {
        match self.capture_inner(cmd_id, cam_id).await {
            Ok(url) => {
                counter!(SNAPSHOT_OK).increment(1);
                Ok(url)
            }
            Err(err) => {
                counter!(SNAPSHOT_ERR).increment(1);
                warn!(cmd_id, cam_id, error = %err, "snapshot failed");
                Err(err)
            }
        }
    }

    async fn capture_inner(&self, cmd_id: &str, cam_id: &str) -> Result<String, DownstreamError> {
        let image = self.camera.capture(cam_id).await?;
        let key = snapshot_key(cmd_id, cam_id, Utc::now());
        let size = image.len();
        self.store.put(&key, image, JPEG).await?;
        let url = self.store.signed_url(&key, self.url_ttl).await?;
        info!(cmd_id, cam_id, key = %key, bytes = size, "snapshot uploaded");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct FixedCamera(Result<&'static [u8], u16>);

    #[async_trait]
    impl CameraClient for FixedCamera {
        async fn capture(&self, _cam_id: &str) -> Result<Bytes, DownstreamError> {
            match self.0 {
                Ok(data) => Ok(Bytes::from_static(data)),
                Err(status) => Err(DownstreamError::Status {
                    service: CAMERA,
                    status,
                }),
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn put(&self, _: &str, _: Bytes, _: &'static str) -> Result<(), DownstreamError> {
            Err(DownstreamError::Storage {
                operation: "put",
                message: "bucket unavailable".into(),
            })
        }

        async fn signed_url(&self, _: &str, _: Duration) -> Result<String, DownstreamError> {
            Ok("http://should-not-be-returned".into())
        }
    }

    #[test]
    fn key_is_namespaced_by_task_and_camera() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        assert_eq!(
            snapshot_key("abc", "top_cam", at),
            "abc/top_cam_2024-05-01T12:30:05.jpg"
        );
        assert_eq!(
            snapshot_key("../x", "a/b", at),
            ".._x/a_b_2024-05-01T12:30:05.jpg"
        );
        assert_eq!(snapshot_key("..", "", at), "_/__2024-05-01T12:30:05.jpg");
    }

    #[tokio::test]
    async fn capture_uploads_then_signs() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(
            Arc::new(FixedCamera(Ok(b"jpgdata"))),
            store.clone(),
            Duration::from_secs(86_400),
        );

        let url = bridge.capture("1", "c").await.unwrap();
        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("1/c_"));
        assert!(keys[0].ends_with(".jpg"));
        assert_eq!(
            url,
            format!("memory://localhost/{}?expires=86400&signature=mock", keys[0])
        );
        let stored = store.get(&keys[0]).unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"jpgdata"));
        assert_eq!(stored.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn camera_failure_uploads_nothing() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(
            Arc::new(FixedCamera(Err(500))),
            store.clone(),
            Duration::from_secs(60),
        );

        let err = bridge.capture("1", "c").await.unwrap_err();
        assert!(matches!(err, DownstreamError::Status { status: 500, .. }));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_returns_no_url() {
        let bridge = SnapshotBridge::new(
            Arc::new(FixedCamera(Ok(b"jpgdata"))),
            Arc::new(BrokenStore),
            Duration::from_secs(60),
        );

        let err = bridge.capture("1", "c").await.unwrap_err();
        assert!(matches!(err, DownstreamError::Storage { operation: "put", .. }));
    }
}
