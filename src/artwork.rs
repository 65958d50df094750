//! Cover and artist images.
//!
//! The catalog's image CDN addresses pictures by a hash and a square size.
//! Covers for embedding are fetched once per album and size into a shared
//! cache directory; concurrent tracks of the same album wait on a per-file
//! guard instead of fetching twice.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::safety::write_atomic;

pub const IMAGE_CDN: &str = "https://e-cdns-images.dzcdn.net/images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Cover,
    Artist,
}

impl ImageKind {
    fn segment(self) -> &'static str {
        match self {
            ImageKind::Cover => "cover",
            ImageKind::Artist => "artist",
        }
    }
}

/// CDN URL of a picture at `size`x`size`.
pub fn image_url(kind: ImageKind, pic: &str, size: u32, extension: &str) -> String {
    format!(
        "{}/{}/{}/{}x{}-000000-80-0-0.{}",
        IMAGE_CDN,
        kind.segment(),
        pic,
        size,
        size,
        extension
    )
}

/// Picture hash from a CDN URL, e.g. the artist's `picture_small`.
///
/// `.../images/artist/<hash>/56x56-000000-80-0-0.jpg` -> `<hash>`.
pub fn picture_hash(url: &str, kind: ImageKind) -> Option<String> {
    let marker = format!("{}/", kind.segment());
    let start = url.find(&marker)? + marker.len();
    let rest = &url[start..];
    let end = rest.find('/')?;
    let hash = &rest[..end];
    (!hash.is_empty()).then(|| hash.to_string())
}

/// Download-once image cache shared by every track in a batch.
pub struct ArtworkCache {
    dir: PathBuf,
    guards: Mutex<FxHashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ArtworkCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            guards: Mutex::new(FxHashMap::default()),
        }
    }

    /// Cache location of an album cover: `alb<album id>_<size>.<ext>`.
    pub fn cover_path(&self, album_id: i64, size: u32, extension: &str) -> PathBuf {
        self.dir
            .join(format!("alb{}_{}.{}", album_id, size, extension))
    }

    fn guard_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Make `url` available at `path`, fetching only if the file is absent.
    /// Returns `None` when the image could not be obtained.
    pub fn fetch(&self, client: &dyn CatalogClient, url: &str, path: &Path) -> Option<PathBuf> {
        let guard = self.guard_for(path);
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());

        if path.is_file() {
            debug!(path = %path.display(), "Artwork cache hit");
            return Some(path.to_path_buf());
        }
        download_image(client, url, path).then(|| path.to_path_buf())
    }
}

/// Fetch an image and write it atomically. Failures are logged, not raised.
pub fn download_image(client: &dyn CatalogClient, url: &str, path: &Path) -> bool {
    let bytes = match client.download_image(url) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            warn!(url, "Image download returned no data");
            return false;
        }
        Err(e) => {
            warn!(url, error = %e, "Couldn't download image");
            return false;
        }
    };
    match write_atomic(path, &bytes) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Couldn't write image");
            false
        }
    }
}
