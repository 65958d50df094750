//! In-memory catalog and tagger for unit tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::catalog::{
    AlbumSummary, ArtistDoc, CatalogClient, Contributor, FullTrack, LightAlbum, LightTrack,
    LyricsDoc, PlaylistDoc, PublicAlbum, SearchHit, SearchKind, SearchQuery,
};
use crate::error::CatalogError;
use crate::format::Encoding;
use crate::models::Track;
use crate::settings::TagOptions;
use crate::tagger::Tagger;

#[derive(Debug, Default)]
pub struct CallCounts {
    pub get_lightweight_track: AtomicUsize,
    pub get_full_track: AtomicUsize,
    pub get_content_hash: AtomicUsize,
    pub get_album: AtomicUsize,
    pub get_lightweight_album: AtomicUsize,
    pub get_artist: AtomicUsize,
    pub get_lyrics: AtomicUsize,
    pub search: AtomicUsize,
    pub get_stream_url: AtomicUsize,
    pub stream_to: AtomicUsize,
    pub get_lightweight_album_tracks: AtomicUsize,
    pub get_playlist: AtomicUsize,
    pub get_lightweight_playlist_tracks: AtomicUsize,
    pub get_artist_albums: AtomicUsize,
    pub download_image: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        [
            &self.get_lightweight_track,
            &self.get_full_track,
            &self.get_content_hash,
            &self.get_album,
            &self.get_lightweight_album,
            &self.get_artist,
            &self.get_lyrics,
            &self.search,
            &self.get_stream_url,
            &self.stream_to,
            &self.get_lightweight_album_tracks,
            &self.get_playlist,
            &self.get_lightweight_playlist_tracks,
            &self.get_artist_albums,
            &self.download_image,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn missing(what: &str, id: i64) -> CatalogError {
    CatalogError::api(format!("{} {} not found", what, id))
}

/// Scripted catalog. Anything not registered answers with an API error,
/// except full track documents, which default to an empty document.
#[derive(Default)]
pub struct FakeCatalog {
    pub calls: CallCounts,
    tracks: FxHashMap<i64, LightTrack>,
    full_tracks: FxHashMap<i64, FullTrack>,
    hashes: FxHashMap<i64, String>,
    albums: FxHashMap<i64, PublicAlbum>,
    light_albums: FxHashMap<i64, LightAlbum>,
    artists: FxHashMap<i64, ArtistDoc>,
    lyrics: FxHashMap<i64, LyricsDoc>,
    searches: FxHashMap<String, i64>,
    album_tracks: FxHashMap<i64, Vec<LightTrack>>,
    playlists: FxHashMap<i64, (PlaylistDoc, Vec<LightTrack>)>,
    artist_albums: FxHashMap<i64, Vec<AlbumSummary>>,
    /// `(track, encoding)`; `None` refuses every encoding.
    refused: Vec<(i64, Option<Encoding>)>,
    stream_delays: FxHashMap<i64, u64>,
    image_delay_ms: u64,
    failing_images: bool,
    search_log: Mutex<Vec<String>>,
    completed: Mutex<Vec<i64>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, record: LightTrack) -> Self {
        self.tracks.insert(record.id, record);
        self
    }

    pub fn with_full_track(mut self, full: FullTrack) -> Self {
        self.full_tracks.insert(full.id, full);
        self
    }

    pub fn with_hash(mut self, id: i64, hash: &str) -> Self {
        self.hashes.insert(id, hash.to_string());
        self
    }

    pub fn with_album(mut self, album: PublicAlbum) -> Self {
        self.albums.insert(album.id, album);
        self
    }

    pub fn with_light_album(mut self, album: LightAlbum) -> Self {
        self.light_albums.insert(album.id, album);
        self
    }

    pub fn with_artist(mut self, artist: ArtistDoc) -> Self {
        self.artists.insert(artist.id, artist);
        self
    }

    pub fn with_lyrics(mut self, track_id: i64, doc: LyricsDoc) -> Self {
        self.lyrics.insert(track_id, doc);
        self
    }

    /// Register the single hit for a rendered query string.
    pub fn with_search(mut self, query: &str, id: i64) -> Self {
        self.searches.insert(query.to_string(), id);
        self
    }

    pub fn with_album_tracks(mut self, album_id: i64, records: Vec<LightTrack>) -> Self {
        self.album_tracks.insert(album_id, records);
        self
    }

    pub fn with_playlist(mut self, playlist: PlaylistDoc, records: Vec<LightTrack>) -> Self {
        self.playlists.insert(playlist.id, (playlist, records));
        self
    }

    pub fn with_artist_albums(mut self, artist_id: i64, albums: Vec<AlbumSummary>) -> Self {
        self.artist_albums.insert(artist_id, albums);
        self
    }

    pub fn refuse_stream(mut self, id: i64, encoding: Option<Encoding>) -> Self {
        self.refused.push((id, encoding));
        self
    }

    pub fn with_stream_delay(mut self, id: i64, ms: u64) -> Self {
        self.stream_delays.insert(id, ms);
        self
    }

    pub fn with_image_delay_ms(mut self, ms: u64) -> Self {
        self.image_delay_ms = ms;
        self
    }

    pub fn with_failing_images(mut self) -> Self {
        self.failing_images = true;
        self
    }

    /// Rendered queries, in the order they were issued.
    pub fn search_log(&self) -> Vec<String> {
        self.search_log.lock().unwrap().clone()
    }

    /// Track ids whose streams finished, in completion order.
    pub fn completed(&self) -> Vec<i64> {
        self.completed.lock().unwrap().clone()
    }

    fn is_refused(&self, id: i64, code: u8) -> bool {
        self.refused
            .iter()
            .any(|(rid, enc)| *rid == id && enc.map_or(true, |e| e.code() == code))
    }
}

impl CatalogClient for FakeCatalog {
    fn get_lightweight_track(&self, id: i64) -> Result<LightTrack, CatalogError> {
        bump(&self.calls.get_lightweight_track);
        self.tracks.get(&id).cloned().ok_or_else(|| missing("track", id))
    }

    fn get_full_track(&self, id: i64) -> Result<FullTrack, CatalogError> {
        bump(&self.calls.get_full_track);
        Ok(self.full_tracks.get(&id).cloned().unwrap_or(FullTrack {
            id,
            ..FullTrack::default()
        }))
    }

    fn get_content_hash(&self, id: i64) -> Result<String, CatalogError> {
        bump(&self.calls.get_content_hash);
        self.hashes.get(&id).cloned().ok_or_else(|| missing("hash", id))
    }

    fn get_album(&self, id: i64) -> Result<PublicAlbum, CatalogError> {
        bump(&self.calls.get_album);
        self.albums.get(&id).cloned().ok_or_else(|| missing("album", id))
    }

    fn get_lightweight_album(&self, id: i64) -> Result<LightAlbum, CatalogError> {
        bump(&self.calls.get_lightweight_album);
        self.light_albums
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("album", id))
    }

    fn get_artist(&self, id: i64) -> Result<ArtistDoc, CatalogError> {
        bump(&self.calls.get_artist);
        self.artists.get(&id).cloned().ok_or_else(|| missing("artist", id))
    }

    fn get_lyrics(&self, track_id: i64) -> Result<LyricsDoc, CatalogError> {
        bump(&self.calls.get_lyrics);
        self.lyrics
            .get(&track_id)
            .cloned()
            .ok_or_else(|| missing("lyrics", track_id))
    }

    fn search(
        &self,
        query: &SearchQuery,
        _kind: SearchKind,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CatalogError> {
        bump(&self.calls.search);
        let rendered = query.to_string();
        let hit = self.searches.get(&rendered).copied();
        self.search_log.lock().unwrap().push(rendered);
        Ok(hit
            .map(|id| SearchHit { id, title: None })
            .into_iter()
            .take(limit)
            .collect())
    }

    fn get_stream_url(
        &self,
        id: i64,
        _content_hash: &str,
        _media_version: &str,
        encoding: Encoding,
    ) -> Result<String, CatalogError> {
        bump(&self.calls.get_stream_url);
        Ok(format!("fake://stream/{}/{}", id, encoding.code()))
    }

    fn stream_to(&self, id: i64, url: &str, out: &mut dyn Write) -> Result<u64, CatalogError> {
        bump(&self.calls.stream_to);
        let code: u8 = url
            .rsplit('/')
            .next()
            .and_then(|c| c.parse().ok())
            .unwrap_or_default();
        if let Some(ms) = self.stream_delays.get(&id) {
            thread::sleep(Duration::from_millis(*ms));
        }
        if self.is_refused(id, code) {
            return Err(CatalogError::Status {
                status: 403,
                url: url.to_string(),
            });
        }
        let payload = format!("audio-{}-{}", id, code);
        out.write_all(payload.as_bytes())?;
        self.completed.lock().unwrap().push(id);
        Ok(payload.len() as u64)
    }

    fn get_lightweight_album_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError> {
        bump(&self.calls.get_lightweight_album_tracks);
        self.album_tracks
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("album", id))
    }

    fn get_playlist(&self, id: i64) -> Result<PlaylistDoc, CatalogError> {
        bump(&self.calls.get_playlist);
        self.playlists
            .get(&id)
            .map(|(doc, _)| doc.clone())
            .ok_or_else(|| missing("playlist", id))
    }

    fn get_lightweight_playlist_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError> {
        bump(&self.calls.get_lightweight_playlist_tracks);
        self.playlists
            .get(&id)
            .map(|(_, records)| records.clone())
            .ok_or_else(|| missing("playlist", id))
    }

    fn get_artist_albums(&self, id: i64) -> Result<Vec<AlbumSummary>, CatalogError> {
        bump(&self.calls.get_artist_albums);
        self.artist_albums
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("artist", id))
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        bump(&self.calls.download_image);
        if self.image_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.image_delay_ms));
        }
        if self.failing_images {
            return Err(CatalogError::Transport(format!("image refused: {}", url)));
        }
        Ok(format!("image:{}", url).into_bytes())
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Encoded, catalog-backed record on album 100 by artist 27.
pub fn light_track(id: i64, title: &str, artist: &str) -> LightTrack {
    LightTrack {
        id,
        title: title.to_string(),
        duration: 200,
        content_hash: Some(format!("hash{}", id.abs())),
        media_version: "1".to_string(),
        filesize: Some(3_000_000),
        filesize_mp3_128: Some(3_000_000),
        filesize_mp3_320: Some(8_000_000),
        filesize_flac: Some(25_000_000),
        disk_number: Some(1),
        track_number: Some(1),
        lyrics_id: Some(0),
        artist_id: 27,
        artist_name: artist.to_string(),
        album_id: 100,
        album_title: "Album".to_string(),
        album_picture: Some("albumpic".to_string()),
        ..LightTrack::default()
    }
}

pub fn public_album(id: i64, title: &str, artist: &str) -> PublicAlbum {
    PublicAlbum {
        id,
        title: title.to_string(),
        artist: Some(ArtistDoc {
            id: 27,
            name: artist.to_string(),
            picture_small: Some(
                "https://e-cdns-images.dzcdn.net/images/artist/artistpic/56x56-000000-80-0-0.jpg"
                    .to_string(),
            ),
        }),
        contributors: vec![Contributor {
            id: 27,
            name: artist.to_string(),
            role: "Main".to_string(),
        }],
        nb_tracks: Some(12),
        record_type: Some("album".to_string()),
        label: Some("Label".to_string()),
        cover_small: Some(
            "https://e-cdns-images.dzcdn.net/images/cover/albumpic/56x56-000000-80-0-0.jpg"
                .to_string(),
        ),
        nb_disk: Some(1),
        copyright: Some("(P) 2001 Label".to_string()),
        ..PublicAlbum::default()
    }
}

pub fn light_album(id: i64, title: &str, artist_id: i64, artist_name: &str) -> LightAlbum {
    LightAlbum {
        id,
        title: title.to_string(),
        artist_id,
        artist_name: artist_name.to_string(),
        track_total: Some(12),
        disc_total: Some(1),
        picture: Some("albumpic".to_string()),
        ..LightAlbum::default()
    }
}

// ============================================================================
// Tagger
// ============================================================================

/// Records every call; optionally fails each one.
#[derive(Debug, Default)]
pub struct RecordingTagger {
    fail: bool,
    calls: Mutex<Vec<(PathBuf, i64, Option<u32>)>>,
}

impl RecordingTagger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(path, track id)` per call.
    pub fn tagged(&self) -> Vec<(PathBuf, i64)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, id, _)| (path.clone(), *id))
            .collect()
    }

    pub fn positions(&self) -> Vec<Option<u32>> {
        self.calls.lock().unwrap().iter().map(|c| c.2).collect()
    }
}

impl Tagger for RecordingTagger {
    fn embed_tags(&self, path: &Path, track: &Track, _options: &TagOptions) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), track.id, track.position));
        if self.fail {
            anyhow::bail!("tagging disabled for {:?}", path);
        }
        Ok(())
    }
}
