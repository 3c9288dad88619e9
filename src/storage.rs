use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MinioConfig;

const REGION: &str = "us-east-1";

/// Photo formats a label scan accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Heic,
}

impl ImageKind {
    /// Reads a `Content-Type` header value; parameters and case are ignored.
    pub fn from_content_type(ct: &str) -> Option<Self> {
        let essence = ct.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            "image/heic" | "image/heif" => Some(Self::Heic),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Heic => "heic",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Heic => "image/heic",
        }
    }
}

/// Object key of one scanned photo: `scans/{user}/{image}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanImageKey {
    pub user_id: Uuid,
    pub image_id: Uuid,
    pub kind: ImageKind,
}

impl ScanImageKey {
    pub fn new(user_id: Uuid, kind: ImageKind) -> Self {
        Self {
            user_id,
            image_id: Uuid::new_v4(),
            kind,
        }
    }
}

impl fmt::Display for ScanImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scans/{}/{}.{}",
            self.user_id,
            self.image_id,
            self.kind.extension()
        )
    }
}

/// Where label photos are kept while (and after) they are analyzed.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put_image(&self, key: &ScanImageKey, body: Bytes) -> anyhow::Result<()>;
    async fn remove_image(&self, key: &ScanImageKey) -> anyhow::Result<()>;
}

/// S3/MinIO bucket holding scanned photos.
#[derive(Clone)]
pub struct S3ImageStore {
    client: Client,
    bucket: String,
}

impl S3ImageStore {
    pub async fn connect(cfg: &MinioConfig) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(REGION))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "minio-static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        // MinIO serves buckets by path, not by subdomain.
        let conf = S3ConfigBuilder::from(&shared)
            .force_path_style(true)
            .build();

        info!(endpoint = %cfg.endpoint, bucket = %cfg.bucket, "scan image bucket configured");
        Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        }
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn put_image(&self, key: &ScanImageKey, body: Bytes) -> anyhow::Result<()> {
        let object = key.to_string();
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object)
            .body(ByteStream::from(body))
            .content_type(key.kind.mime())
            .send()
            .await
            .with_context(|| format!("storing scan image {object}"))?;
        debug!(key = %object, size, "scan image stored");
        Ok(())
    }

    async fn remove_image(&self, key: &ScanImageKey) -> anyhow::Result<()> {
        let object = key.to_string();
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .with_context(|| format!("removing scan image {object}"))?;
        Ok(())
    }
}
