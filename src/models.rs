//! Core data models for track resolution and download.
//!
//! `Track` and `Album` are the canonical resolved entities; everything the
//! catalog may omit is an `Option`. `DownloadResult` is the per-slot outcome
//! handed from the downloader to the aggregator.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::catalog::{LightTrack, PlaylistDoc, PublicAlbum};
use crate::error::DownloadError;
use crate::format::Encoding;

// ============================================================================
// Type Aliases
// ============================================================================

/// Contributor names grouped by role ("Main", "Featured", "Composer", ...).
pub type RoleMap = FxHashMap<String, Vec<String>>;

// ============================================================================
// Track building blocks
// ============================================================================

/// Byte size per encoding. Zero means "not encoded".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSizes {
    pub default: u64,
    pub mp3_128: u64,
    pub mp3_320: u64,
    pub flac: u64,
    pub ra360_lq: u64,
    pub ra360_mq: u64,
    pub ra360_hq: u64,
}

impl FileSizes {
    pub fn from_record(record: &LightTrack) -> Self {
        Self {
            default: record.filesize.unwrap_or(0),
            mp3_128: record.filesize_mp3_128.unwrap_or(0),
            mp3_320: record.filesize_mp3_320.unwrap_or(0),
            flac: record.filesize_flac.unwrap_or(0),
            ra360_lq: record.filesize_360_lq.unwrap_or(0),
            ra360_mq: record.filesize_360_mq.unwrap_or(0),
            ra360_hq: record.filesize_360_hq.unwrap_or(0),
        }
    }

    pub fn size_of(&self, encoding: Encoding) -> u64 {
        match encoding {
            Encoding::Flac => self.flac,
            Encoding::Mp3_320 => self.mp3_320,
            Encoding::Mp3_128 => self.mp3_128,
            Encoding::Mp3Default => self.default,
            Encoding::Ra360Hq => self.ra360_hq,
            Encoding::Ra360Mq => self.ra360_mq,
            Encoding::Ra360Lq => self.ra360_lq,
        }
    }

    pub fn set_size(&mut self, encoding: Encoding, size: u64) {
        let slot = match encoding {
            Encoding::Flac => &mut self.flac,
            Encoding::Mp3_320 => &mut self.mp3_320,
            Encoding::Mp3_128 => &mut self.mp3_128,
            Encoding::Mp3Default => &mut self.default,
            Encoding::Ra360Hq => &mut self.ra360_hq,
            Encoding::Ra360Mq => &mut self.ra360_mq,
            Encoding::Ra360Lq => &mut self.ra360_lq,
        };
        *slot = size;
    }
}

/// Output of the format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedFormat {
    pub encoding: Encoding,
    pub size: u64,
}

/// Release date. Any component may be 0 (unknown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseDate {
    pub day: u32,
    pub month: u32,
    pub year: u32,
}

impl ReleaseDate {
    /// Parse the catalog's `YYYY-MM-DD` form. Unparseable components are 0;
    /// a string too short to slice, or split inside a character, is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let part = |range: std::ops::Range<usize>| {
            raw.get(range).map(|s| s.parse::<u32>().unwrap_or(0))
        };
        Some(Self {
            year: part(0..4)?,
            month: part(5..7)?,
            day: part(8..10)?,
        })
    }

    /// A month above 12 means the source swapped day and month.
    pub fn fix_transposed(self) -> Self {
        if self.month > 12 {
            Self {
                day: self.month,
                month: self.day,
                year: self.year,
            }
        } else {
            self
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.day == 0 && self.month == 0 && self.year == 0
    }

    /// Render with a `Y`/`M`/`D` template, e.g. `Y-M-D` -> `2001-03-12`.
    pub fn format(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 6);
        for c in template.chars() {
            match c {
                'Y' => out.push_str(&format!("{:04}", self.year)),
                'M' => out.push_str(&format!("{:02}", self.month)),
                'D' => out.push_str(&format!("{:02}", self.day)),
                other => out.push(other),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistRef {
    pub id: i64,
    pub name: String,
    /// Picture hash on the image CDN.
    pub pic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lyrics {
    pub id: i64,
    pub unsync: Option<String>,
    /// `[mm:ss.xx]line\r\n` blocks, ready for an `.lrc` sidecar.
    pub sync: Option<String>,
}

// ============================================================================
// Canonical entities
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Album {
    pub id: i64,
    pub title: String,
    /// Cover hash on the image CDN.
    pub pic: Option<String>,
    pub main_artist: Option<ArtistRef>,
    pub artists: Vec<String>,
    pub roles: RoleMap,
    pub track_total: Option<u32>,
    pub disc_total: Option<u32>,
    pub record_type: Option<String>,
    pub barcode: Option<String>,
    pub label: Option<String>,
    pub genres: Vec<String>,
    pub date: Option<ReleaseDate>,
    /// Cached embed-size cover on disk.
    pub pic_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    /// Negative for local uploads.
    pub id: i64,
    /// Title with the version suffix appended.
    pub title: String,
    /// Title without "(feat. ...)".
    pub title_clean: String,
    /// Title guaranteed to carry the featured artists once.
    pub title_with_feat: String,
    pub duration: u32,
    pub content_hash: Option<String>,
    pub media_version: String,
    pub fallback_id: Option<i64>,
    pub sizes: FileSizes,
    pub selected: Option<SelectedFormat>,

    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
    /// 1-based slot in the enclosing album/playlist request.
    pub position: Option<u32>,
    pub explicit: Option<bool>,
    pub isrc: Option<String>,
    pub copyright: Option<String>,
    pub bpm: Option<f64>,
    pub replay_gain: Option<String>,
    pub lyrics: Option<Lyrics>,
    pub date: Option<ReleaseDate>,

    pub main_artist: ArtistRef,
    pub artists: Vec<String>,
    pub roles: RoleMap,
    pub main_artists_string: String,
    pub feat_artists_string: Option<String>,
    /// Artist tag value built from the multitag setting.
    pub artists_string: Option<String>,

    pub album: Album,
    pub local: bool,
    /// Reached through a catalog re-search rather than the requested id.
    pub searched: bool,
}

impl Track {
    /// Snapshot of an unresolved record, used when resolution itself fails.
    pub fn partial(record: &LightTrack) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            title_clean: record.title.clone(),
            title_with_feat: record.title.clone(),
            duration: record.duration,
            content_hash: record.content_hash.clone(),
            media_version: record.media_version.clone(),
            fallback_id: record.fallback_id(),
            sizes: FileSizes::from_record(record),
            main_artist: ArtistRef {
                id: record.artist_id,
                name: record.artist_name.clone(),
                pic: record.artist_picture.clone(),
            },
            main_artists_string: record.artist_name.clone(),
            album: Album {
                id: record.album_id,
                title: record.album_title.clone(),
                pic: record.album_picture.clone(),
                ..Album::default()
            },
            local: record.is_local(),
            ..Track::default()
        }
    }

    pub fn has_content_hash(&self) -> bool {
        self.content_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Track date, else the album date.
    pub fn effective_date(&self) -> ReleaseDate {
        self.date.or(self.album.date).unwrap_or_default()
    }

    /// Contributors of one role, if that role exists.
    pub fn role(&self, role: &str) -> Option<&[String]> {
        self.roles.get(role).map(Vec::as_slice)
    }
}

// ============================================================================
// Batch inputs
// ============================================================================

/// Which filename template and folder layout applies to a track.
#[derive(Debug, Clone, Default)]
pub enum EntryContext {
    /// A lone track, or the only track of an album.
    #[default]
    Single,
    AlbumTrack,
    PlaylistTrack(Arc<PlaylistDoc>),
}

/// One unit of batch work.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub record: LightTrack,
    pub context: EntryContext,
    /// Public album document already fetched by the caller, reused by the
    /// resolver.
    pub album: Option<Arc<PublicAlbum>>,
}

impl BatchEntry {
    pub fn single(record: LightTrack) -> Self {
        Self {
            record,
            context: EntryContext::Single,
            album: None,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// A user-visible image the aggregator saves after the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkRequest {
    pub url: String,
    pub path: PathBuf,
    /// Cached copy with identical bytes, when the embed size matches.
    pub cached: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackSuccess {
    pub path: PathBuf,
    pub extras_dir: Option<PathBuf>,
    /// Path relative to `extras_dir`, one line of `playlist.m3u8`.
    pub playlist_entry: Option<String>,
    pub lyrics_path: Option<PathBuf>,
    pub album_art: Option<ArtworkRequest>,
    pub artist_art: Option<ArtworkRequest>,
    /// `"artist - title"` when the track was found by re-search.
    pub searched: Option<String>,
}

#[derive(Debug)]
pub struct TrackFailure {
    /// Last known state of the track.
    pub track: Box<Track>,
    pub error: DownloadError,
    pub extras_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub enum DownloadResult {
    Done(Box<TrackSuccess>),
    Failed(TrackFailure),
}

impl DownloadResult {
    pub fn failed(track: Track, error: DownloadError, extras_dir: Option<PathBuf>) -> Self {
        DownloadResult::Failed(TrackFailure {
            track: Box::new(track),
            error,
            extras_dir,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, DownloadResult::Done(_))
    }

    pub fn extras_dir(&self) -> Option<&PathBuf> {
        match self {
            DownloadResult::Done(s) => s.extras_dir.as_ref(),
            DownloadResult::Failed(f) => f.extras_dir.as_ref(),
        }
    }
}
