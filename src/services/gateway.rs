//! Storage gateway — the abstract surface the core talks to, plus the S3
//! implementation.
//!
//! The store has no partial-metadata-update primitive; metadata edits go
//! through a same-location copy with `MetadataDirective::Replace`. Every
//! call here is a blocking network call from the caller's perspective, and
//! nothing is retried.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{MetadataDirective, ObjectCannedAcl};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::S3Config;
use crate::models::image::EntryKind;

/// Streamed upload body: chunks from the remote source, surfaced as I/O
/// results so a mid-transfer read failure aborts the write.
pub type ByteChunks = BoxStream<'static, io::Result<Bytes>>;

/// One raw entry as the provider reports it. The shape differs between a
/// list call (no custom metadata) and a direct get (metadata included);
/// `Image::from_raw` reconciles both.
#[derive(Clone, Debug)]
pub struct RawObject {
    pub key: String,
    pub kind: EntryKind,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("provider error for `{key}`: {message}")]
    Provider { key: String, message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Key/value-with-metadata blob store operations consumed by the core.
#[async_trait]
pub trait ObjectGateway: Send + Sync {
    /// Enumerate every entry in the store. Order is not meaningful.
    async fn list(&self) -> GatewayResult<Vec<RawObject>>;

    async fn exists(&self, key: &str) -> GatewayResult<bool>;

    /// Fetch a single entry, custom metadata included. A missing key is
    /// `GatewayError::NotFound`, not a provider failure.
    async fn get(&self, key: &str) -> GatewayResult<RawObject>;

    /// Upload content under `key`, consuming the source stream.
    async fn write_stream(&self, key: &str, stream: ByteChunks) -> GatewayResult<()>;

    async fn set_visibility(&self, key: &str, visibility: Visibility) -> GatewayResult<()>;

    /// Same-location copy that fully replaces the object's custom metadata
    /// and reasserts public-read visibility. Not a merge: metadata fields
    /// absent from `metadata` are dropped.
    async fn copy_with_metadata_replace(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<()>;
}

/// S3-backed gateway. Holds one bucket; all keys are bucket-relative.
pub struct S3Gateway {
    client: S3Client,
    bucket: String,
}

impl S3Gateway {
    /// Build a client from explicit configuration. Credentials come from the
    /// standard AWS provider chain; endpoint and path-style overrides exist
    /// for MinIO/LocalStack setups.
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());
        info!(
            bucket = %config.bucket,
            region = %config.region,
            "object gateway initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    fn provider_error(key: &str, err: impl ToString) -> GatewayError {
        GatewayError::Provider {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ObjectGateway for S3Gateway {
    async fn list(&self) -> GatewayResult<Vec<RawObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = continuation_token {
                req = req.continuation_token(token);
            }

            let page = req
                .send()
                .await
                .map_err(|err| Self::provider_error(&self.bucket, err))?;

            for entry in page.contents() {
                let key = entry.key().unwrap_or("").to_string();
                objects.push(RawObject {
                    kind: kind_for_key(&key),
                    last_modified: to_chrono(entry.last_modified()),
                    // ListObjectsV2 never carries custom metadata.
                    metadata: HashMap::new(),
                    key,
                });
            }

            continuation_token = page.next_continuation_token().map(|token| token.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        debug!(count = objects.len(), "listed bucket contents");
        Ok(objects)
    }

    async fn exists(&self, key: &str) -> GatewayResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|svc| svc.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Self::provider_error(key, err))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> GatewayResult<RawObject> {
        let head = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|svc| svc.is_not_found())
                    .unwrap_or(false)
                {
                    return Err(GatewayError::NotFound(key.to_string()));
                }
                return Err(Self::provider_error(key, err));
            }
        };

        Ok(RawObject {
            key: key.to_string(),
            kind: kind_for_key(key),
            last_modified: to_chrono(head.last_modified()),
            metadata: head.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn write_stream(&self, key: &str, mut stream: ByteChunks) -> GatewayResult<()> {
        // The SDK needs a sized, replayable body, so the source stream is
        // drained here. A failed chunk aborts before any bytes hit the store.
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| Self::provider_error(key, err))?;
            body.extend_from_slice(&chunk);
        }

        debug!(key, size_bytes = body.len(), "uploading object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for_key(key))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| Self::provider_error(key, err))?;

        Ok(())
    }

    async fn set_visibility(&self, key: &str, visibility: Visibility) -> GatewayResult<()> {
        let acl = match visibility {
            Visibility::Public => ObjectCannedAcl::PublicRead,
            Visibility::Private => ObjectCannedAcl::Private,
        };

        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(acl)
            .send()
            .await
            .map_err(|err| Self::provider_error(key, err))?;

        Ok(())
    }

    async fn copy_with_metadata_replace(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, key))
            .key(key)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|err| Self::provider_error(key, err))?;

        debug!(key, "replaced object metadata via same-location copy");
        Ok(())
    }
}

/// Directory markers are zero-byte keys with a trailing slash.
fn kind_for_key(key: &str) -> EntryKind {
    if key.ends_with('/') {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

fn to_chrono(timestamp: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    timestamp
        .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
