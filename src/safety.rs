//! Filesystem safety helpers.
//!
//! Side files (lyrics, logs, playlists, artwork) are written to a temporary
//! sibling and renamed into place, so a reader never sees a half-written
//! file and concurrent writers of the same target each publish a whole one.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn tmp_sibling(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
}

/// Write `bytes` to `path` via a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    let written = (|| {
        let f = fs::File::create(&tmp)?;
        let mut w = BufWriter::with_capacity(64 * 1024, f);
        w.write_all(bytes)?;
        w.flush()
    })();
    if let Err(e) = written {
        fs::remove_file(&tmp).ok();
        return Err(e);
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        fs::remove_file(&tmp).ok();
    })
}

/// Lexically normalize a path (no filesystem access): drops `.` and folds
/// `..` into its parent.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validates that the download tree and the artwork cache do not overlap.
///
/// The cache is treated as scratch space; letting the two share a tree would
/// mix cached images into the user's library.
pub fn ensure_disjoint(download_location: &Path, cache_dir: &Path) -> Result<()> {
    let output = normalize_lexically(download_location);
    let cache = normalize_lexically(cache_dir);

    if output == cache {
        bail!(
            "Safety check failed: download location '{}' cannot be the artwork cache",
            download_location.display()
        );
    }
    if output.starts_with(&cache) || cache.starts_with(&output) {
        bail!(
            "Safety check failed: download location '{}' and artwork cache '{}' overlap",
            download_location.display(),
            cache_dir.display()
        );
    }
    Ok(())
}
