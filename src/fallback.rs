//! Recovery for tracks that are not encoded or whose stream is refused.
//!
//! Branches, first match wins, each taken at most once per track:
//!
//! 1. the catalog's own fallback id,
//! 2. a catalog re-search by artist/title/album (if enabled),
//! 3. a lossless-to-lossy step-down (stream refusals only, if enabled).
//!
//! Anything else is terminal. Since every branch is single-use the whole
//! chain runs at most [`MAX_ATTEMPTS`] times per track.

use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, LightTrack, SearchKind, SearchQuery};
use crate::error::{CatalogError, DownloadError, RetryTrigger};
use crate::models::Track;
use crate::normalize::{search_prefix, unify_glyphs};
use crate::settings::Settings;

/// One initial attempt plus one per recovery branch.
pub const MAX_ATTEMPTS: usize = 4;

/// Which optional recovery branches are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub search: bool,
    pub bitrate: bool,
}

impl FallbackPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            search: settings.fallback_search,
            bitrate: settings.fallback_bitrate,
        }
    }
}

/// What the downloader should do next.
#[derive(Debug)]
pub enum Transition {
    /// Resolve this replacement record from scratch.
    Refetch { record: LightTrack, via_search: bool },
    /// The lossless size was zeroed; select again.
    StepDown,
    Fail(DownloadError),
}

/// Per-track retry bookkeeping.
#[derive(Debug, Default)]
pub struct FallbackState {
    pub searched: bool,
    pub used_fallback: bool,
    pub stepped_down: bool,
    /// Catalog ids this track has already been resolved as.
    attempted: FxHashSet<i64>,
}

impl FallbackState {
    pub fn new(initial_id: i64) -> Self {
        Self {
            attempted: FxHashSet::from_iter([initial_id]),
            ..Self::default()
        }
    }

    /// Pick the next transition for `track` after `trigger`.
    pub fn decide(
        &mut self,
        client: &dyn CatalogClient,
        track: &mut Track,
        trigger: RetryTrigger,
        policy: FallbackPolicy,
    ) -> Transition {
        if !self.used_fallback {
            let fresh = track.fallback_id.filter(|id| !self.attempted.contains(id));
            if let Some(fallback_id) = fresh {
                self.used_fallback = true;
                info!(track_id = track.id, fallback_id, "{}, using fallback id", trigger);
                return self.refetch(client, fallback_id, false);
            }
        }

        if policy.search && !self.searched {
            self.searched = true;
            info!(track_id = track.id, "{}, searching for alternative", trigger);
            let found = search_alternative(
                client,
                &track.main_artist.name,
                &track.title,
                &track.album.title,
            );
            return match found {
                Ok(Some(id)) if !self.attempted.contains(&id) => self.refetch(client, id, true),
                Ok(_) => Transition::Fail(DownloadError::SearchExhausted { trigger }),
                Err(e) => Transition::Fail(DownloadError::CatalogApi(e)),
            };
        }

        let lossless = track.selected.is_some_and(|s| s.encoding.is_lossless());
        if trigger == RetryTrigger::StreamUnavailable
            && policy.bitrate
            && lossless
            && !self.stepped_down
        {
            self.stepped_down = true;
            info!(track_id = track.id, "Track not available in FLAC, trying lower bitrates");
            track.sizes.flac = 0;
            return Transition::StepDown;
        }

        Transition::Fail(DownloadError::exhausted(trigger))
    }

    fn refetch(&mut self, client: &dyn CatalogClient, id: i64, via_search: bool) -> Transition {
        self.attempted.insert(id);
        match client.get_lightweight_track(id) {
            Ok(mut record) => {
                // A replacement never chains to a further replacement.
                record.fallback = None;
                Transition::Refetch { record, via_search }
            }
            Err(e) => {
                warn!(track_id = id, error = %e, "Couldn't fetch replacement track");
                Transition::Fail(DownloadError::CatalogApi(e))
            }
        }
    }
}

/// Progressively looser track search; returns the first hit's id.
///
/// artist+track+album, then artist+track, then artist plus the title cut
/// before a parenthetical or " - ".
pub fn search_alternative(
    client: &dyn CatalogClient,
    artist: &str,
    title: &str,
    album: &str,
) -> Result<Option<i64>, CatalogError> {
    let artist = unify_glyphs(artist);
    let title = unify_glyphs(title);
    let album = unify_glyphs(album);

    let mut queries = vec![
        SearchQuery {
            artist: artist.clone(),
            track: title.clone(),
            album: Some(album),
        },
        SearchQuery {
            artist: artist.clone(),
            track: title.clone(),
            album: None,
        },
    ];
    if let Some(prefix) = search_prefix(&title) {
        queries.push(SearchQuery {
            artist,
            track: prefix.to_string(),
            album: None,
        });
    }

    for query in &queries {
        let hits = client.search(query, SearchKind::Track, 1)?;
        if let Some(hit) = hits.first() {
            return Ok(Some(hit.id));
        }
    }
    Ok(None)
}
