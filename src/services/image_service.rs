//! ImageService — catalog, ingestion, and metadata operations over the
//! object gateway.
//!
//! Every operation runs once per external request: no cache, no queue, no
//! retries. The remote store is the sole source of truth and the only shared
//! mutable resource; concurrent metadata updates to the same key are not
//! coordinated, so a stale read-modify-copy can silently discard a
//! concurrent change. Last write wins.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::image::{Image, META_DESCRIPTION, META_TAGS, TagsInput};
use crate::services::gateway::{GatewayError, ObjectGateway, Visibility};

/// Key probed by the readiness check. Never written.
const READY_PROBE_KEY: &str = ".readyz-probe";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("a valid url is required to add a new image (`{url}`: {reason})")]
    InvalidUrl { url: String, reason: String },
    #[error("a file named `{0}` already exists")]
    AlreadyExists(String),
    #[error("transfer for `{key}` failed: {reason}")]
    Transfer { key: String, reason: String },
    #[error("image `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] GatewayError),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Core service behind the HTTP layer. Cheap to clone; handlers receive it
/// as shared axum state.
#[derive(Clone)]
pub struct ImageService {
    gateway: Arc<dyn ObjectGateway>,
    http: reqwest::Client,
}

impl ImageService {
    pub fn new(gateway: Arc<dyn ObjectGateway>) -> Self {
        Self {
            gateway,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch every qualifying image from the store.
    ///
    /// Non-image files and directory markers are silently excluded; an empty
    /// bucket yields an empty list, not an error.
    pub async fn list_all(&self) -> ImageResult<Vec<Image>> {
        let entries = self.gateway.list().await?;
        Ok(entries
            .iter()
            .map(Image::from_raw)
            .filter(Image::is_image)
            .collect())
    }

    /// Stable sort, most recently modified first. Entries with equal
    /// timestamps keep their input order — providers routinely report the
    /// same second for batch-written objects.
    pub fn sort_by_recency(mut images: Vec<Image>) -> Vec<Image> {
        images.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        images
    }

    /// Move every image whose key contains `needle` to the front, keeping
    /// relative order on both sides of the split. An empty needle is a no-op.
    ///
    /// This surfaces a just-uploaded image at the top of a freshly re-fetched
    /// listing even when store clocks have not caught up with the write.
    pub fn promote(images: Vec<Image>, needle: &str) -> Vec<Image> {
        if needle.is_empty() {
            return images;
        }
        let (mut promoted, rest): (Vec<_>, Vec<_>) = images
            .into_iter()
            .partition(|image| image.key.contains(needle));
        promoted.extend(rest);
        promoted
    }

    /// Caller-facing listing: qualifying images, newest first, with an
    /// optional just-uploaded key floated to the top.
    pub async fn list_images(&self, highlight: Option<&str>) -> ImageResult<Vec<Image>> {
        let images = Self::sort_by_recency(self.list_all().await?);
        Ok(Self::promote(images, highlight.unwrap_or("")))
    }

    /// Fetch a single image by key. A missing key is a normal negative
    /// result. Any other provider failure on this path also collapses to
    /// `None`, logged at warn level so throttling masquerading as absence
    /// is at least visible.
    pub async fn find(&self, key: &str) -> Option<Image> {
        match self.gateway.get(key).await {
            Ok(entry) => Some(Image::from_raw(&entry)),
            Err(GatewayError::NotFound(_)) => None,
            Err(err) => {
                warn!(key, error = %err, "treating provider failure during lookup as not found");
                None
            }
        }
    }

    /// Persist a new description and tag set for an existing object.
    ///
    /// The store cannot patch metadata in place, so this issues a
    /// same-location copy carrying the full replacement metadata map and
    /// reasserting public visibility. Non-atomic with respect to concurrent
    /// writers of the same key.
    pub async fn update_metadata(
        &self,
        key: &str,
        description: &str,
        tags: TagsInput,
    ) -> ImageResult<()> {
        if !self.gateway.exists(key).await? {
            return Err(ImageError::NotFound(key.to_string()));
        }

        let tags = tags.into_tags();
        let mut metadata = HashMap::new();
        metadata.insert(META_DESCRIPTION.to_string(), description.to_string());
        metadata.insert(META_TAGS.to_string(), tags.join(","));

        self.gateway
            .copy_with_metadata_replace(key, metadata)
            .await
            .map_err(|err| match err {
                GatewayError::NotFound(_) => ImageError::NotFound(key.to_string()),
                other => ImageError::Storage(other),
            })?;

        info!(key, "image metadata updated");
        Ok(())
    }

    /// Copy the content behind `source_url` into the store under a derived
    /// key and make it public. Returns the key so the caller can highlight
    /// it in a subsequent listing.
    ///
    /// The collision check happens before any transfer begins; a key
    /// conflict performs zero writes. A transfer that fails partway is not
    /// rolled back — the store's state for that key is best-effort.
    pub async fn upload_from_url(
        &self,
        source_url: &str,
        name: Option<&str>,
    ) -> ImageResult<String> {
        let key = derive_object_key(source_url, name, Utc::now().timestamp())?;

        if self.gateway.exists(&key).await? {
            return Err(ImageError::AlreadyExists(key));
        }

        debug!(url = source_url, key, "fetching remote image");
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| ImageError::Transfer {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)))
            .boxed();

        self.gateway
            .write_stream(&key, stream)
            .await
            .map_err(|err| ImageError::Transfer {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        self.gateway.set_visibility(&key, Visibility::Public).await?;

        info!(key, "image added from url");
        Ok(key)
    }

    /// Readiness probe: one cheap existence check against the store.
    pub async fn check_store(&self) -> Result<(), GatewayError> {
        self.gateway.exists(READY_PROBE_KEY).await.map(|_| ())
    }
}

/// Derive a safe object key from a source URL and optional user name.
///
/// The filename is the user-provided name, or `<url-stem>-<unix-ts>` for
/// collision-resistant defaults. It is then cleansed: whitespace becomes
/// hyphens, everything outside `[A-Za-z0-9-]` is stripped, and the whole
/// key (extension included) is lowercased.
fn derive_object_key(
    source_url: &str,
    name: Option<&str>,
    timestamp: i64,
) -> ImageResult<String> {
    let parsed = Url::parse(source_url).map_err(|err| ImageError::InvalidUrl {
        url: source_url.to_string(),
        reason: err.to_string(),
    })?;

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let segment = percent_decode_str(segment).decode_utf8_lossy();

    let (stem, extension) = match segment.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem.to_string(), ext.to_string()),
        _ => {
            return Err(ImageError::InvalidUrl {
                url: source_url.to_string(),
                reason: "url path has no file extension".to_string(),
            });
        }
    };

    let filename = match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => format!("{}-{}", stem, timestamp),
    };
    let filename: String = filename
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    Ok(format!("{}.{}", filename, extension).to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::EntryKind;
    use crate::services::gateway::{ByteChunks, GatewayResult, RawObject};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    /// In-memory gateway recording every mutation, so all-or-nothing
    /// properties are assertable.
    #[derive(Default)]
    struct MemoryGateway {
        objects: Mutex<HashMap<String, RawObject>>,
        writes: Mutex<Vec<String>>,
        fail_get: bool,
        fail_write: bool,
    }

    impl MemoryGateway {
        fn with_objects(entries: Vec<RawObject>) -> Self {
            let objects = entries
                .into_iter()
                .map(|entry| (entry.key.clone(), entry))
                .collect();
            Self {
                objects: Mutex::new(objects),
                ..Self::default()
            }
        }

        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        fn metadata_for(&self, key: &str) -> HashMap<String, String> {
            self.objects.lock().unwrap()[key].metadata.clone()
        }
    }

    #[async_trait]
    impl ObjectGateway for MemoryGateway {
        async fn list(&self) -> GatewayResult<Vec<RawObject>> {
            let mut entries: Vec<_> = self.objects.lock().unwrap().values().cloned().collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(entries)
        }

        async fn exists(&self, key: &str) -> GatewayResult<bool> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        async fn get(&self, key: &str) -> GatewayResult<RawObject> {
            if self.fail_get {
                return Err(GatewayError::Provider {
                    key: key.to_string(),
                    message: "simulated throttling".to_string(),
                });
            }
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(key.to_string()))
        }

        async fn write_stream(&self, key: &str, mut stream: ByteChunks) -> GatewayResult<()> {
            while let Some(chunk) = stream.next().await {
                chunk.map_err(|err| GatewayError::Provider {
                    key: key.to_string(),
                    message: err.to_string(),
                })?;
            }
            if self.fail_write {
                return Err(GatewayError::Provider {
                    key: key.to_string(),
                    message: "simulated write failure".to_string(),
                });
            }
            self.writes.lock().unwrap().push(key.to_string());
            self.objects.lock().unwrap().insert(
                key.to_string(),
                entry(key, EntryKind::File, Utc::now()),
            );
            Ok(())
        }

        async fn set_visibility(&self, _key: &str, _visibility: Visibility) -> GatewayResult<()> {
            Ok(())
        }

        async fn copy_with_metadata_replace(
            &self,
            key: &str,
            metadata: HashMap<String, String>,
        ) -> GatewayResult<()> {
            let mut objects = self.objects.lock().unwrap();
            let object = objects
                .get_mut(key)
                .ok_or_else(|| GatewayError::NotFound(key.to_string()))?;
            object.metadata = metadata;
            self.writes.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn entry(key: &str, kind: EntryKind, at: DateTime<Utc>) -> RawObject {
        RawObject {
            key: key.to_string(),
            kind,
            last_modified: at,
            metadata: HashMap::new(),
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn service(gateway: MemoryGateway) -> ImageService {
        ImageService::new(Arc::new(gateway))
    }

    fn keys(images: &[Image]) -> Vec<&str> {
        images.iter().map(|image| image.key.as_str()).collect()
    }

    #[tokio::test]
    async fn list_all_excludes_non_images_and_directories() {
        let gateway = MemoryGateway::with_objects(vec![
            entry("sunset.png", EntryKind::File, ts(10)),
            entry("notes.txt", EntryKind::File, ts(20)),
            entry("albums/", EntryKind::Directory, ts(30)),
            entry("beach.jpg", EntryKind::File, ts(40)),
        ]);

        let images = service(gateway).list_all().await.unwrap();
        assert_eq!(keys(&images), vec!["beach.jpg", "sunset.png"]);
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let images = service(MemoryGateway::default()).list_all().await.unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn sort_by_recency_is_stable_on_equal_timestamps() {
        let images: Vec<Image> = [
            entry("old.png", EntryKind::File, ts(1)),
            entry("first.png", EntryKind::File, ts(5)),
            entry("second.png", EntryKind::File, ts(5)),
        ]
        .iter()
        .map(Image::from_raw)
        .collect();

        let sorted = ImageService::sort_by_recency(images);
        assert_eq!(keys(&sorted), vec!["first.png", "second.png", "old.png"]);
    }

    #[test]
    fn promote_with_empty_needle_is_identity() {
        let images: Vec<Image> = [
            entry("a.png", EntryKind::File, ts(1)),
            entry("b.png", EntryKind::File, ts(2)),
        ]
        .iter()
        .map(Image::from_raw)
        .collect();

        let promoted = ImageService::promote(images, "");
        assert_eq!(keys(&promoted), vec!["a.png", "b.png"]);
    }

    #[test]
    fn promote_is_a_front_stable_permutation() {
        let images: Vec<Image> = [
            entry("a.png", EntryKind::File, ts(1)),
            entry("b-match.png", EntryKind::File, ts(2)),
            entry("c.png", EntryKind::File, ts(3)),
            entry("d-match.png", EntryKind::File, ts(4)),
        ]
        .iter()
        .map(Image::from_raw)
        .collect();

        let promoted = ImageService::promote(images, "match");
        assert_eq!(
            keys(&promoted),
            vec!["b-match.png", "d-match.png", "a.png", "c.png"]
        );
    }

    #[test]
    fn promote_leaves_unmatched_listings_unchanged() {
        let images: Vec<Image> = [
            entry("a.png", EntryKind::File, ts(1)),
            entry("b.png", EntryKind::File, ts(2)),
        ]
        .iter()
        .map(Image::from_raw)
        .collect();

        let promoted = ImageService::promote(images, "zzz");
        assert_eq!(keys(&promoted), vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn listing_sorts_then_promotes_the_highlighted_key() {
        let gateway = MemoryGateway::with_objects(vec![
            entry("recent.png", EntryKind::File, ts(100)),
            entry("fresh-upload.jpg", EntryKind::File, ts(1)),
            entry("older.gif", EntryKind::File, ts(50)),
        ]);

        let images = service(gateway)
            .list_images(Some("fresh-upload"))
            .await
            .unwrap();
        assert_eq!(
            keys(&images),
            vec!["fresh-upload.jpg", "recent.png", "older.gif"]
        );
    }

    #[tokio::test]
    async fn find_returns_none_for_missing_keys() {
        let found = service(MemoryGateway::default()).find("missing.png").await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn find_collapses_provider_failures_to_none() {
        let gateway = MemoryGateway {
            fail_get: true,
            ..MemoryGateway::default()
        };
        let found = service(gateway).find("throttled.png").await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn find_hydrates_metadata_like_the_listing_path() {
        let mut object = entry("beach.png", EntryKind::File, ts(7));
        object
            .metadata
            .insert(META_DESCRIPTION.to_string(), "Sunset".to_string());
        object
            .metadata
            .insert(META_TAGS.to_string(), "sand,sea".to_string());
        let gateway = MemoryGateway::with_objects(vec![object]);

        let image = service(gateway).find("beach.png").await.unwrap();
        assert_eq!(image.description.as_deref(), Some("Sunset"));
        assert_eq!(image.tags, vec!["sand", "sea"]);
        assert_eq!(image.path.as_deref(), Some("/beach/png"));
    }

    #[tokio::test]
    async fn update_metadata_normalizes_and_persists_the_full_set() {
        let gateway = Arc::new(MemoryGateway::with_objects(vec![entry(
            "beach.png",
            EntryKind::File,
            ts(7),
        )]));
        let service = ImageService::new(gateway.clone());

        service
            .update_metadata(
                "beach.png",
                "Sunset",
                TagsInput::Raw("beach, Sunset \n ocean".to_string()),
            )
            .await
            .unwrap();

        let metadata = gateway.metadata_for("beach.png");
        assert_eq!(metadata[META_DESCRIPTION], "Sunset");
        assert_eq!(metadata[META_TAGS], "beach,sunset,ocean");
    }

    #[tokio::test]
    async fn update_metadata_rejects_missing_keys() {
        let err = service(MemoryGateway::default())
            .update_metadata("ghost.png", "nope", TagsInput::List(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(key) if key == "ghost.png"));
    }

    #[tokio::test]
    async fn upload_conflict_performs_zero_writes() {
        let gateway = Arc::new(MemoryGateway::with_objects(vec![entry(
            "existingname.jpg",
            EntryKind::File,
            ts(1),
        )]));
        let service = ImageService::new(gateway.clone());

        let err = service
            .upload_from_url("https://example.com/photos/pic.jpg", Some("existingname"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::AlreadyExists(key) if key == "existingname.jpg"));
        assert_eq!(gateway.write_count(), 0);
    }

    /// Serve a fixed image body on an ephemeral local port.
    async fn serve_image() -> (String, tokio::task::JoinHandle<()>) {
        let app = axum::Router::new().route(
            "/photos/pic.jpg",
            axum::routing::get(|| async { b"fake image bytes".to_vec() }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/photos/pic.jpg", addr), server)
    }

    #[tokio::test]
    async fn upload_streams_the_source_into_the_store() {
        let (url, server) = serve_image().await;
        let gateway = Arc::new(MemoryGateway::default());
        let service = ImageService::new(gateway.clone());

        let key = service.upload_from_url(&url, Some("newpic")).await.unwrap();

        assert_eq!(key, "newpic.jpg");
        assert_eq!(gateway.write_count(), 1);
        assert!(gateway.objects.lock().unwrap().contains_key("newpic.jpg"));
        server.abort();
    }

    #[tokio::test]
    async fn failed_remote_fetch_surfaces_as_transfer() {
        // Nothing listens on the discard port, so the fetch fails outright.
        let gateway = Arc::new(MemoryGateway::default());
        let service = ImageService::new(gateway.clone());

        let err = service
            .upload_from_url("http://127.0.0.1:9/photos/pic.jpg", Some("newpic"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::Transfer { ref key, .. } if key == "newpic.jpg"));
        assert_eq!(gateway.write_count(), 0);
    }

    #[tokio::test]
    async fn failed_gateway_write_surfaces_as_transfer_and_commits_nothing() {
        let (url, server) = serve_image().await;
        let gateway = Arc::new(MemoryGateway {
            fail_write: true,
            ..MemoryGateway::default()
        });
        let service = ImageService::new(gateway.clone());

        let err = service.upload_from_url(&url, Some("newpic")).await.unwrap_err();

        assert!(matches!(err, ImageError::Transfer { ref key, .. } if key == "newpic.jpg"));
        assert_eq!(gateway.write_count(), 0);
        assert!(!gateway.objects.lock().unwrap().contains_key("newpic.jpg"));
        server.abort();
    }

    #[test]
    fn derives_default_keys_with_timestamp_disambiguation() {
        let key =
            derive_object_key("https://example.com/photos/My Pic.JPG", None, 1_700_000_000)
                .unwrap();
        assert_eq!(key, "my-pic-1700000000.jpg");
    }

    #[test]
    fn derives_keys_from_user_supplied_names() {
        let key = derive_object_key(
            "https://example.com/a/photo.PNG",
            Some("Fancy Name!"),
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(key, "fancy-name.png");
    }

    #[test]
    fn blank_names_fall_back_to_the_default() {
        let key =
            derive_object_key("https://example.com/a/photo.png", Some("  "), 42).unwrap();
        assert_eq!(key, "photo-42.png");
    }

    #[test]
    fn rejects_malformed_urls() {
        let err = derive_object_key("not a url", None, 0).unwrap_err();
        assert!(matches!(err, ImageError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_urls_without_a_file_extension() {
        let err = derive_object_key("https://example.com/photos/", None, 0).unwrap_err();
        assert!(matches!(err, ImageError::InvalidUrl { .. }));
    }
}
