//! Post-batch side artifacts.
//!
//! One pass over the ordered results builds the error log, the searched log
//! and the playlist, and saves the user-visible artwork. Every write here is
//! best-effort: a failure is logged and the batch still completes.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::artwork::download_image;
use crate::catalog::CatalogClient;
use crate::models::{ArtworkRequest, DownloadResult};
use crate::safety::write_atomic;
use crate::settings::Settings;

pub const ERRORS_FILE: &str = "errors.txt";
pub const SEARCHED_FILE: &str = "searched.txt";
pub const PLAYLIST_FILE: &str = "playlist.m3u8";

/// Whether the batch came from a single track or a collection. Playlists are
/// only written for collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    Single,
    Collection,
}

/// Lines accumulated from one batch, in slot order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub errors: Vec<String>,
    pub searched: Vec<String>,
    /// One per slot; empty when the slot produced no file.
    pub playlist: Vec<String>,
    pub artifacts_dir: Option<PathBuf>,
}

impl Summary {
    pub fn collect(results: &[DownloadResult]) -> Self {
        let mut summary = Summary::default();
        for result in results {
            if summary.artifacts_dir.is_none() {
                summary.artifacts_dir = result.extras_dir().cloned();
            }
            match result {
                DownloadResult::Done(success) => {
                    summary
                        .playlist
                        .push(success.playlist_entry.clone().unwrap_or_default());
                    if let Some(line) = &success.searched {
                        summary.searched.push(line.clone());
                    }
                }
                DownloadResult::Failed(failure) => {
                    summary.playlist.push(String::new());
                    let track = &failure.track;
                    summary.errors.push(format!(
                        "{} | {} - {} | {}",
                        track.id, track.main_artist.name, track.title, failure.error
                    ));
                }
            }
        }
        summary
    }
}

/// Save one artwork request unless an earlier slot already handled its
/// target path. Reuses the embed-time cache file when sizes matched.
fn save_artwork(
    client: &dyn CatalogClient,
    request: &ArtworkRequest,
    seen: &mut FxHashSet<PathBuf>,
) {
    if !seen.insert(request.path.clone()) || request.path.exists() {
        return;
    }
    if let Some(cached) = request.cached.as_deref().filter(|p| p.is_file()) {
        match fs::read(cached).and_then(|bytes| write_atomic(&request.path, &bytes)) {
            Ok(()) => return,
            Err(e) => warn!(path = %request.path.display(), error = %e, "Couldn't copy cached artwork"),
        }
    }
    download_image(client, &request.url, &request.path);
}

fn write_best_effort(path: &Path, content: &str) {
    match write_atomic(path, content.as_bytes()) {
        Ok(()) => info!(path = %path.display(), "Wrote batch artifact"),
        Err(e) => warn!(path = %path.display(), error = %e, "Couldn't write batch artifact"),
    }
}

/// Merge `lines` into an existing searched log, keeping prior entries and
/// skipping duplicates.
fn merge_searched(existing: &str, lines: &[String]) -> String {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = String::new();
    for line in existing.lines().map(str::trim_end).chain(lines.iter().map(String::as_str)) {
        if !line.is_empty() && seen.insert(line) {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out
}

/// Write the batch artifacts and return the artifacts directory, if any
/// slot produced one.
pub fn finalize(
    client: &dyn CatalogClient,
    results: &[DownloadResult],
    settings: &Settings,
    scope: BatchScope,
) -> Option<PathBuf> {
    let mut seen = FxHashSet::default();
    for result in results {
        if let DownloadResult::Done(success) = result {
            if settings.save_artwork {
                if let Some(request) = &success.album_art {
                    save_artwork(client, request, &mut seen);
                }
            }
            if settings.save_artwork_artist {
                if let Some(request) = &success.artist_art {
                    save_artwork(client, request, &mut seen);
                }
            }
        }
    }

    let summary = Summary::collect(results);
    let dir = summary.artifacts_dir.clone()?;

    if settings.log_errors && !summary.errors.is_empty() {
        let content: String = summary
            .errors
            .iter()
            .map(|line| format!("{}\r\n", line))
            .collect();
        write_best_effort(&dir.join(ERRORS_FILE), &content);
    }

    if settings.log_searched && !summary.searched.is_empty() {
        let path = dir.join(SEARCHED_FILE);
        let existing = fs::read_to_string(&path).unwrap_or_default();
        write_best_effort(&path, &merge_searched(&existing, &summary.searched));
    }

    if settings.create_m3u8_file && scope == BatchScope::Collection && !summary.playlist.is_empty() {
        let content: String = summary
            .playlist
            .iter()
            .map(|line| format!("{}\n", line))
            .collect();
        write_best_effort(&dir.join(PLAYLIST_FILE), &content);
    }

    Some(dir)
}
