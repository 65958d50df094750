//! Metadata resolution.
//!
//! A lightweight catalog record is turned into a canonical [`Track`] by a
//! fixed sequence of enrichment steps. Each step takes the partially built
//! track and returns it with more fields filled; network lookups happen only
//! when a step finds its inputs missing. Album-level documents are cached by
//! album id for the lifetime of one [`Resolver`], which the downloader keeps
//! for every fallback attempt of a single track.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::artwork::{picture_hash, ImageKind};
use crate::catalog::{
    ArtistDoc, CatalogClient, Contributor, FullTrack, LightAlbum, LightTrack, LyricsDoc,
    PublicAlbum, SyncLine, VARIOUS_ARTISTS_ID,
};
use crate::error::CatalogError;
use crate::models::{Album, ArtistRef, FileSizes, Lyrics, ReleaseDate, RoleMap, Track};
use crate::normalize::{has_featuring_marker, join_artists, strip_featuring};

/// Offset between the catalog's gain value and ReplayGain's reference level.
const REPLAY_GAIN_OFFSET: f64 = 18.4;

const UNKNOWN: &str = "Unknown";

// ============================================================================
// Album document cache
// ============================================================================

#[derive(Debug, Clone)]
enum PublicAlbumState {
    Available(Arc<PublicAlbum>),
    /// The catalog refused the public document (API-level error).
    Unavailable,
}

/// Album and artist documents fetched while resolving one track.
#[derive(Debug, Default)]
pub struct AlbumDocCache {
    public: FxHashMap<i64, PublicAlbumState>,
    light: FxHashMap<i64, Arc<LightAlbum>>,
    artists: FxHashMap<i64, Arc<ArtistDoc>>,
}

impl AlbumDocCache {
    /// Register a public document the caller already holds.
    pub fn seed_public(&mut self, album: Arc<PublicAlbum>) {
        self.public
            .insert(album.id, PublicAlbumState::Available(album));
    }

    /// Public album, or `None` when the catalog answers with an API error.
    fn public(
        &mut self,
        client: &dyn CatalogClient,
        id: i64,
    ) -> Result<Option<Arc<PublicAlbum>>, CatalogError> {
        if let Some(state) = self.public.get(&id) {
            return Ok(match state {
                PublicAlbumState::Available(album) => Some(Arc::clone(album)),
                PublicAlbumState::Unavailable => None,
            });
        }
        match client.get_album(id) {
            Ok(album) => {
                let album = Arc::new(album);
                self.public
                    .insert(id, PublicAlbumState::Available(Arc::clone(&album)));
                Ok(Some(album))
            }
            Err(e) if e.is_api() => {
                debug!(album_id = id, error = %e, "Public album unavailable");
                self.public.insert(id, PublicAlbumState::Unavailable);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn light(
        &mut self,
        client: &dyn CatalogClient,
        id: i64,
    ) -> Result<Arc<LightAlbum>, CatalogError> {
        if let Some(album) = self.light.get(&id) {
            return Ok(Arc::clone(album));
        }
        let album = Arc::new(client.get_lightweight_album(id)?);
        self.light.insert(id, Arc::clone(&album));
        Ok(album)
    }

    fn artist(
        &mut self,
        client: &dyn CatalogClient,
        id: i64,
    ) -> Result<Arc<ArtistDoc>, CatalogError> {
        if let Some(artist) = self.artists.get(&id) {
            return Ok(Arc::clone(artist));
        }
        let artist = Arc::new(client.get_artist(id)?);
        self.artists.insert(id, Arc::clone(&artist));
        Ok(artist)
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// `"-(gain + 18.4)"` rendered with two decimals, e.g. `"-5.60 dB"`.
pub fn replay_gain(gain: f64) -> String {
    format!("{:.2} dB", -(gain + REPLAY_GAIN_OFFSET))
}

/// Build `.lrc` text from synced lines.
///
/// A line without its own timestamp takes the timestamp of the line after
/// it. A trailing line without a timestamp is dropped.
pub fn build_sync_lyrics(lines: &[SyncLine]) -> String {
    let mut out = String::new();
    for (i, entry) in lines.iter().enumerate() {
        let timestamp = match &entry.lrc_timestamp {
            Some(ts) => Some(ts),
            None => lines.get(i + 1).and_then(|next| next.lrc_timestamp.as_ref()),
        };
        if let Some(ts) = timestamp {
            out.push_str(ts);
            out.push_str(&entry.line);
            out.push_str("\r\n");
        }
    }
    out
}

fn parse_date(raw: Option<&str>) -> Option<ReleaseDate> {
    raw.and_then(ReleaseDate::parse).filter(|d| !d.is_unknown())
}

/// Flat name list and role map, without the "Various Artists" placeholder.
fn group_contributors(contributors: &[Contributor]) -> (Vec<String>, RoleMap) {
    let mut names = Vec::new();
    let mut roles = RoleMap::default();
    for c in contributors.iter().filter(|c| c.id != VARIOUS_ARTISTS_ID) {
        names.push(c.name.clone());
        roles.entry(c.role.clone()).or_default().push(c.name.clone());
    }
    (names, roles)
}

// ============================================================================
// Enrichment steps
// ============================================================================

/// Identity, stream essentials and sizes.
fn base_track(record: &LightTrack) -> Track {
    let mut title = record.title.clone();
    if let Some(version) = record.version.as_deref().filter(|v| !v.trim().is_empty()) {
        title.push(' ');
        title.push_str(version.trim());
    }
    Track {
        id: record.id,
        title,
        duration: record.duration,
        content_hash: record.content_hash.clone(),
        media_version: record.media_version.clone(),
        fallback_id: record.fallback_id(),
        sizes: FileSizes::from_record(record),
        ..Track::default()
    }
}

/// Terminal shape for user uploads: no album, no date, one artist.
fn local_track(mut track: Track, record: &LightTrack) -> Track {
    let name = record.artist_name.clone();
    track.local = true;
    track.main_artist = ArtistRef {
        id: 0,
        name: name.clone(),
        pic: None,
    };
    track.artists = vec![name.clone()];
    track.roles = RoleMap::from_iter([("Main".to_string(), vec![name.clone()])]);
    track.main_artists_string = name;
    track.album = Album {
        id: 0,
        title: record.album_title.clone(),
        pic: record.album_picture.clone(),
        ..Album::default()
    };
    track.date = Some(ReleaseDate::default());
    track.title_clean = track.title.clone();
    track.title_with_feat = track.title.clone();
    track
}

/// Fields the gateway record carries directly.
fn apply_record_fields(mut track: Track, record: &LightTrack) -> Track {
    track.disc_number = record.disk_number;
    track.explicit = record.explicit;
    track.copyright = record.copyright.clone().filter(|c| !c.is_empty());
    track.replay_gain = record.gain.map(replay_gain);
    track.isrc = record.isrc.clone();
    track.track_number = record.track_number;
    track.position = record.position;
    track.main_artist = ArtistRef {
        id: record.artist_id,
        name: record.artist_name.clone(),
        pic: record.artist_picture.clone(),
    };
    track.date = parse_date(record.release_date.as_deref());
    track.album = Album {
        id: record.album_id,
        title: record.album_title.clone(),
        pic: record.album_picture.clone().filter(|p| !p.is_empty()),
        ..Album::default()
    };
    track
}

fn apply_lyrics(mut track: Track, lyrics_id: i64, doc: Option<&LyricsDoc>) -> Track {
    let Some(doc) = doc else {
        return track;
    };
    track.lyrics = Some(Lyrics {
        id: lyrics_id,
        unsync: doc.text.clone().filter(|t| !t.is_empty()),
        sync: doc
            .sync
            .as_deref()
            .map(build_sync_lyrics)
            .filter(|s| !s.is_empty()),
    });
    track
}

/// Public album path: carries barcode, label, genres and contributors.
fn apply_public_album(mut track: Track, album: &PublicAlbum) -> Track {
    let (artists, roles) = group_contributors(&album.contributors);
    let target = &mut track.album;
    if let Some(artist) = &album.artist {
        target.main_artist = Some(ArtistRef {
            id: artist.id,
            name: artist.name.clone(),
            pic: artist
                .picture_small
                .as_deref()
                .and_then(|url| picture_hash(url, ImageKind::Artist)),
        });
    }
    target.artists = artists;
    target.roles = roles;
    target.track_total = album.nb_tracks;
    target.record_type = album.record_type.clone();
    target.barcode = Some(album.upc.clone().unwrap_or_else(|| UNKNOWN.to_string()));
    target.label = Some(album.label.clone().unwrap_or_else(|| UNKNOWN.to_string()));
    if target.pic.is_none() {
        target.pic = album
            .cover_small
            .as_deref()
            .and_then(|url| picture_hash(url, ImageKind::Cover));
    }
    target.date = parse_date(album.release_date.as_deref());
    target.disc_total = album.nb_disk;
    target.genres = album.genre_names();
    if track.copyright.is_none() {
        track.copyright = album.copyright.clone().filter(|c| !c.is_empty());
    }
    track
}

/// Secondary path for albums the public endpoint refuses.
fn apply_light_album(mut track: Track, album: &LightAlbum, artist: Option<&ArtistDoc>) -> Track {
    let target = &mut track.album;
    target.main_artist = Some(ArtistRef {
        id: album.artist_id,
        name: album.artist_name.clone(),
        pic: artist
            .and_then(|a| a.picture_small.as_deref())
            .and_then(|url| picture_hash(url, ImageKind::Artist)),
    });
    target.artists = vec![album.artist_name.clone()];
    target.roles = RoleMap::from_iter([("Main".to_string(), vec![album.artist_name.clone()])]);
    target.track_total = album.track_total;
    target.disc_total = album.disc_total;
    target.record_type = Some("Album".to_string());
    target.barcode = Some(UNKNOWN.to_string());
    target.label = Some(album.label.clone().unwrap_or_else(|| UNKNOWN.to_string()));
    if target.pic.is_none() {
        target.pic = album.picture.clone().filter(|p| !p.is_empty());
    }
    target.date = parse_date(album.release_date.as_deref());
    target.genres = Vec::new();
    track
}

/// BPM, contributors, and whatever the gateway record lacked.
fn apply_full_track(mut track: Track, full: &FullTrack) -> Track {
    track.bpm = full.bpm.filter(|b| *b > 0.0);
    if track.replay_gain.is_none() {
        track.replay_gain = full.gain.map(replay_gain);
    }
    if track.explicit.is_none() {
        track.explicit = full.explicit_lyrics;
    }
    if track.disc_number.is_none() {
        track.disc_number = full.disk_number;
    }
    let (artists, roles) = group_contributors(&full.contributors);
    track.artists = artists;
    track.roles = roles;
    track
}

/// Disc total and copyright from the lightweight album document.
fn apply_backfill(mut track: Track, album: &LightAlbum) -> Track {
    if track.album.disc_total.is_none() {
        track.album.disc_total = album.disc_total;
    }
    if track.copyright.is_none() {
        track.copyright = album.copyright.clone().filter(|c| !c.is_empty());
    }
    track
}

/// Swap transposed day/month; the track date falls back to the album date
/// and vice versa.
fn normalize_dates(mut track: Track) -> Track {
    let track_date = track.date.map(ReleaseDate::fix_transposed);
    let album_date = track.album.date.map(ReleaseDate::fix_transposed);
    track.date = track_date.or(album_date);
    track.album.date = album_date.or(track_date);
    track
}

fn derive_display_strings(mut track: Track) -> Track {
    track.title_clean = strip_featuring(&track.title);

    track.main_artists_string = match track.role("Main") {
        Some(main) if !main.is_empty() => join_artists(main),
        _ => track.main_artist.name.clone(),
    };
    track.feat_artists_string = track
        .role("Featured")
        .filter(|feat| !feat.is_empty())
        .map(|feat| format!("feat. {}", join_artists(feat)));

    track.title_with_feat = match &track.feat_artists_string {
        Some(feat) if !has_featuring_marker(&track.title) => format!("{} ({})", track.title, feat),
        _ => track.title.clone(),
    };
    if track.artists.is_empty() {
        track.artists = vec![track.main_artist.name.clone()];
    }
    track
}

// ============================================================================
// Resolver
// ============================================================================

pub struct Resolver<'a> {
    client: &'a dyn CatalogClient,
    cache: AlbumDocCache,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a dyn CatalogClient) -> Self {
        Self {
            client,
            cache: AlbumDocCache::default(),
        }
    }

    /// Fill in a missing content hash. An empty hash is kept: it means the
    /// catalog has not encoded the track yet.
    fn ensure_content_hash(&self, mut record: LightTrack) -> Result<LightTrack, CatalogError> {
        if record.content_hash.is_none() {
            record.content_hash = Some(self.client.get_content_hash(record.id)?);
        }
        Ok(record)
    }

    fn fetch_lyrics(&self, record: &LightTrack) -> Option<LyricsDoc> {
        let lyrics_id = record.lyrics_id.unwrap_or(0);
        if lyrics_id == 0 {
            return None;
        }
        if let Some(doc) = &record.lyrics {
            return Some(doc.clone());
        }
        match self.client.get_lyrics(record.id) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(track_id = record.id, error = %e, "Couldn't fetch lyrics");
                None
            }
        }
    }

    fn enrich_album(&mut self, track: Track) -> Result<Track, CatalogError> {
        let album_id = track.album.id;
        if let Some(public) = self.cache.public(self.client, album_id)? {
            return Ok(apply_public_album(track, &public));
        }
        let light = self.cache.light(self.client, album_id)?;
        let artist = match self.cache.artist(self.client, light.artist_id) {
            Ok(artist) => Some(artist),
            Err(e) => {
                warn!(artist_id = light.artist_id, error = %e, "Couldn't fetch album artist");
                None
            }
        };
        Ok(apply_light_album(track, &light, artist.as_deref()))
    }

    fn backfill(&mut self, track: Track) -> Result<Track, CatalogError> {
        if track.album.disc_total.is_some() && track.copyright.is_some() {
            return Ok(track);
        }
        let light = self.cache.light(self.client, track.album.id)?;
        Ok(apply_backfill(track, &light))
    }

    /// Resolve one record. `full` and `album` are documents the caller
    /// already fetched; anything else is looked up on demand.
    pub fn resolve(
        &mut self,
        record: LightTrack,
        full: Option<&FullTrack>,
        album: Option<&Arc<PublicAlbum>>,
    ) -> Result<Track, CatalogError> {
        if let Some(album) = album {
            self.cache.seed_public(Arc::clone(album));
        }

        if record.is_local() {
            return Ok(local_track(base_track(&record), &record));
        }

        let record = self.ensure_content_hash(record)?;
        let lyrics = self.fetch_lyrics(&record);

        let track = base_track(&record);
        let track = apply_record_fields(track, &record);
        let track = apply_lyrics(track, record.lyrics_id.unwrap_or(0), lyrics.as_ref());
        let track = self.enrich_album(track)?;
        let track = match full.filter(|f| f.id == record.id) {
            Some(full) => apply_full_track(track, full),
            None => apply_full_track(track, &self.client.get_full_track(record.id)?),
        };
        let track = self.backfill(track)?;
        let track = normalize_dates(track);
        Ok(derive_display_strings(track))
    }
}
