//! Catalog capability set and the documents it returns.
//!
//! Two families of documents come back from the catalog. Gateway records
//! ("lightweight") use upper-case keys and are loose about types: ids and
//! sizes arrive as strings or numbers depending on the endpoint. Public
//! documents use snake_case keys. Everything optional is an `Option`;
//! nothing here guesses a value the catalog did not send.

use std::fmt;
use std::io::Write;

use serde::Deserialize;

use crate::error::CatalogError;
use crate::format::Encoding;

/// Contributor id the catalog uses for "Various Artists".
pub const VARIOUS_ARTISTS_ID: i64 = 5080;

// ============================================================================
// Client capability set
// ============================================================================

/// Everything the pipeline needs from the remote catalog.
///
/// Implementations own authentication and transport. All calls are blocking;
/// the batch pool provides the parallelism.
pub trait CatalogClient: Send + Sync {
    fn get_lightweight_track(&self, id: i64) -> Result<LightTrack, CatalogError>;
    fn get_full_track(&self, id: i64) -> Result<FullTrack, CatalogError>;
    fn get_content_hash(&self, id: i64) -> Result<String, CatalogError>;

    /// Public album document. Unpublished or region-blocked albums fail with
    /// [`CatalogError::Api`].
    fn get_album(&self, id: i64) -> Result<PublicAlbum, CatalogError>;
    fn get_lightweight_album(&self, id: i64) -> Result<LightAlbum, CatalogError>;
    fn get_artist(&self, id: i64) -> Result<ArtistDoc, CatalogError>;
    fn get_lyrics(&self, track_id: i64) -> Result<LyricsDoc, CatalogError>;

    fn search(
        &self,
        query: &SearchQuery,
        kind: SearchKind,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CatalogError>;

    fn get_stream_url(
        &self,
        id: i64,
        content_hash: &str,
        media_version: &str,
        encoding: Encoding,
    ) -> Result<String, CatalogError>;

    /// Stream the audio payload into `out`, returning the bytes written.
    /// A refused transfer is a [`CatalogError::Status`] with 403 or 404.
    fn stream_to(&self, id: i64, url: &str, out: &mut dyn Write) -> Result<u64, CatalogError>;

    fn get_lightweight_album_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError>;
    fn get_playlist(&self, id: i64) -> Result<PlaylistDoc, CatalogError>;
    fn get_lightweight_playlist_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError>;
    fn get_artist_albums(&self, id: i64) -> Result<Vec<AlbumSummary>, CatalogError>;

    /// Raw bytes of an image on the catalog's CDN.
    fn download_image(&self, url: &str) -> Result<Vec<u8>, CatalogError>;
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Track,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchKind::Track => "track",
        }
    }
}

/// Structured catalog query, rendered as `artist:"A" track:"T" album:"B"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub artist: String,
    pub track: String,
    pub album: Option<String>,
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artist:\"{}\" track:\"{}\"", self.artist, self.track)?;
        if let Some(album) = &self.album {
            write!(f, " album:\"{}\"", album)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

// ============================================================================
// Gateway (lightweight) documents
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackRef {
    #[serde(rename = "SNG_ID", deserialize_with = "lenient::i64")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncLine {
    #[serde(default)]
    pub lrc_timestamp: Option<String>,
    #[serde(default)]
    pub line: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LyricsDoc {
    #[serde(rename = "LYRICS_TEXT", default)]
    pub text: Option<String>,
    #[serde(rename = "LYRICS_SYNC_JSON", default)]
    pub sync: Option<Vec<SyncLine>>,
}

/// Lightweight track record from the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightTrack {
    #[serde(rename = "SNG_ID", deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(rename = "SNG_TITLE", default)]
    pub title: String,
    #[serde(rename = "VERSION", default)]
    pub version: Option<String>,
    #[serde(rename = "DURATION", default, deserialize_with = "lenient::u32")]
    pub duration: u32,
    #[serde(rename = "MD5_ORIGIN", default)]
    pub content_hash: Option<String>,
    #[serde(rename = "MEDIA_VERSION", default, deserialize_with = "lenient::string")]
    pub media_version: String,
    #[serde(rename = "FALLBACK", default)]
    pub fallback: Option<FallbackRef>,

    #[serde(rename = "FILESIZE", default, deserialize_with = "lenient::opt_u64")]
    pub filesize: Option<u64>,
    #[serde(rename = "FILESIZE_MP3_128", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_mp3_128: Option<u64>,
    #[serde(rename = "FILESIZE_MP3_320", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_mp3_320: Option<u64>,
    #[serde(rename = "FILESIZE_FLAC", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_flac: Option<u64>,
    #[serde(rename = "FILESIZE_MP4_RA1", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_360_lq: Option<u64>,
    #[serde(rename = "FILESIZE_MP4_RA2", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_360_mq: Option<u64>,
    #[serde(rename = "FILESIZE_MP4_RA3", default, deserialize_with = "lenient::opt_u64")]
    pub filesize_360_hq: Option<u64>,

    #[serde(rename = "DISK_NUMBER", default, deserialize_with = "lenient::opt_u32")]
    pub disk_number: Option<u32>,
    #[serde(rename = "EXPLICIT_LYRICS", default, deserialize_with = "lenient::opt_flag")]
    pub explicit: Option<bool>,
    #[serde(rename = "COPYRIGHT", default)]
    pub copyright: Option<String>,
    #[serde(rename = "GAIN", default, deserialize_with = "lenient::opt_f64")]
    pub gain: Option<f64>,
    #[serde(rename = "ISRC", default)]
    pub isrc: Option<String>,
    #[serde(rename = "TRACK_NUMBER", default, deserialize_with = "lenient::opt_u32")]
    pub track_number: Option<u32>,
    #[serde(rename = "POSITION", default, deserialize_with = "lenient::opt_u32")]
    pub position: Option<u32>,

    #[serde(rename = "LYRICS_ID", default, deserialize_with = "lenient::opt_i64")]
    pub lyrics_id: Option<i64>,
    #[serde(rename = "LYRICS", default)]
    pub lyrics: Option<LyricsDoc>,

    #[serde(rename = "ART_ID", default, deserialize_with = "lenient::i64")]
    pub artist_id: i64,
    #[serde(rename = "ART_NAME", default)]
    pub artist_name: String,
    #[serde(rename = "ART_PICTURE", default)]
    pub artist_picture: Option<String>,
    #[serde(rename = "PHYSICAL_RELEASE_DATE", default)]
    pub release_date: Option<String>,

    #[serde(rename = "ALB_ID", default, deserialize_with = "lenient::i64")]
    pub album_id: i64,
    #[serde(rename = "ALB_TITLE", default)]
    pub album_title: String,
    #[serde(rename = "ALB_PICTURE", default)]
    pub album_picture: Option<String>,
}

impl LightTrack {
    /// Negative ids are user uploads that never went through the catalog.
    pub fn is_local(&self) -> bool {
        self.id < 0
    }

    pub fn fallback_id(&self) -> Option<i64> {
        self.fallback.as_ref().map(|f| f.id).filter(|id| *id != 0)
    }
}

/// Lightweight album record from the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightAlbum {
    #[serde(rename = "ALB_ID", default, deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(rename = "ALB_TITLE", default)]
    pub title: String,
    #[serde(rename = "ART_ID", default, deserialize_with = "lenient::i64")]
    pub artist_id: i64,
    #[serde(rename = "ART_NAME", default)]
    pub artist_name: String,
    #[serde(rename = "NUMBER_TRACK", default, deserialize_with = "lenient::opt_u32")]
    pub track_total: Option<u32>,
    #[serde(rename = "NUMBER_DISK", default, deserialize_with = "lenient::opt_u32")]
    pub disc_total: Option<u32>,
    #[serde(rename = "LABEL_NAME", default)]
    pub label: Option<String>,
    #[serde(rename = "ALB_PICTURE", default)]
    pub picture: Option<String>,
    #[serde(rename = "PHYSICAL_RELEASE_DATE", default)]
    pub release_date: Option<String>,
    #[serde(rename = "COPYRIGHT", default)]
    pub copyright: Option<String>,
}

// ============================================================================
// Public documents
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contributor {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// Public track document. Only consulted for fields the gateway omits.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FullTrack {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub bpm: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub gain: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_flag")]
    pub explicit_lyrics: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub disk_number: Option<u32>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistDoc {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture_small: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Genre {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackRef {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
}

/// Public album document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicAlbum {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<ArtistDoc>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub nb_tracks: Option<u32>,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub cover_small: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub nb_disk: Option<u32>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub genres: Option<DataList<Genre>>,
    #[serde(default)]
    pub tracks: Option<DataList<TrackRef>>,
}

impl PublicAlbum {
    pub fn genre_names(&self) -> Vec<String> {
        self.genres
            .as_ref()
            .map(|g| g.data.iter().map(|genre| genre.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn track_ids(&self) -> Vec<i64> {
        self.tracks
            .as_ref()
            .map(|t| t.data.iter().map(|track| track.id).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistDoc {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub nb_tracks: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumSummary {
    #[serde(deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

// ============================================================================
// Lenient decoding
// ============================================================================

/// Deserializers that accept a number or a numeric string. Blank strings and
/// `null` decode as absent.
pub(crate) mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_i64(v: &Value) -> Option<i64> {
        match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn is_blank(v: &Value) -> bool {
        match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let v = Value::deserialize(d)?;
        if is_blank(&v) {
            return Ok(0);
        }
        as_i64(&v).ok_or_else(|| D::Error::custom(format!("expected integer, got {v}")))
    }

    pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        Ok(opt_u32(d)?.unwrap_or(0))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(as_i64(&v))
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(as_i64(&v).and_then(|n| u32::try_from(n).ok()))
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(as_i64(&v).map(|n| n.max(0) as u64))
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(as_f64(&v))
    }

    /// `"0"`, `0` and `false` are false; any other present value is true.
    pub fn opt_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(match v {
            Value::Null => None,
            Value::Bool(b) => Some(b),
            other => as_i64(&other).map(|n| n != 0),
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(match v {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}
