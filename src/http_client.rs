//! HTTP client for the catalog gateway service.
//!
//! The gateway exposes the catalog as plain JSON routes and hands out
//! ready-to-fetch stream URLs; sessions, signing and decryption stay on its
//! side. Routes:
//!
//! | Route | Document |
//! |---|---|
//! | `GET /gw/track/{id}` | lightweight track |
//! | `GET /gw/track/{id}/hash` | `{"MD5_ORIGIN": ...}` |
//! | `GET /gw/track/{id}/lyrics` | lyrics |
//! | `GET /gw/track/{id}/stream?hash=&media_version=&format=` | `{"url": ...}` |
//! | `GET /gw/album/{id}` / `/gw/album/{id}/tracks` | lightweight album / `{"data": [...]}` |
//! | `GET /gw/playlist/{id}/tracks` | `{"data": [...]}` |
//! | `GET /track/{id}`, `/album/{id}`, `/artist/{id}`, `/playlist/{id}` | public documents |
//! | `GET /artist/{id}/albums` | `{"data": [...]}` |
//! | `GET /search/{kind}?q=&limit=` | `{"data": [...]}` |
//!
//! A `200` whose body carries an `error` object is an API-level refusal and
//! maps to [`CatalogError::Api`].

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::{
    AlbumSummary, ArtistDoc, CatalogClient, DataList, FullTrack, LightAlbum, LightTrack,
    LyricsDoc, PlaylistDoc, PublicAlbum, SearchHit, SearchKind, SearchQuery,
};
use crate::error::CatalogError;
use crate::format::Encoding;

#[derive(Debug, Deserialize)]
struct HashDoc {
    #[serde(rename = "MD5_ORIGIN", default)]
    content_hash: String,
}

#[derive(Debug, Deserialize)]
struct StreamDoc {
    url: String,
}

pub struct HttpCatalogClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

/// API-level error carried in a successful response body, if any.
fn api_error(body: &Value) -> Option<CatalogError> {
    let error = body.get("error")?;
    let message = match error {
        Value::Null => return None,
        Value::Object(map) if map.is_empty() => return None,
        Value::Array(items) if items.is_empty() => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    };
    Some(CatalogError::api(message))
}

fn transport(e: reqwest::Error) -> CatalogError {
    CatalogError::Transport(e.to_string())
}

impl HttpCatalogClient {
    /// `base_url` is the gateway root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str, timeout_sec: u64) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::blocking::Response, CatalogError> {
        let response = self.client.get(url).query(query).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, CatalogError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let body: Value = self
            .send(&url, query)?
            .json()
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        if let Some(err) = api_error(&body) {
            return Err(err);
        }
        serde_json::from_value(body).map_err(|e| CatalogError::Decode(format!("{}: {}", url, e)))
    }

    fn get_list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>, CatalogError> {
        let list: DataList<T> = self.get_json(path, query)?;
        Ok(list.data)
    }
}

impl CatalogClient for HttpCatalogClient {
    fn get_lightweight_track(&self, id: i64) -> Result<LightTrack, CatalogError> {
        self.get_json(&format!("/gw/track/{}", id), &[])
    }

    fn get_full_track(&self, id: i64) -> Result<FullTrack, CatalogError> {
        self.get_json(&format!("/track/{}", id), &[])
    }

    fn get_content_hash(&self, id: i64) -> Result<String, CatalogError> {
        let doc: HashDoc = self.get_json(&format!("/gw/track/{}/hash", id), &[])?;
        Ok(doc.content_hash)
    }

    fn get_album(&self, id: i64) -> Result<PublicAlbum, CatalogError> {
        self.get_json(&format!("/album/{}", id), &[])
    }

    fn get_lightweight_album(&self, id: i64) -> Result<LightAlbum, CatalogError> {
        self.get_json(&format!("/gw/album/{}", id), &[])
    }

    fn get_artist(&self, id: i64) -> Result<ArtistDoc, CatalogError> {
        self.get_json(&format!("/artist/{}", id), &[])
    }

    fn get_lyrics(&self, track_id: i64) -> Result<LyricsDoc, CatalogError> {
        self.get_json(&format!("/gw/track/{}/lyrics", track_id), &[])
    }

    fn search(
        &self,
        query: &SearchQuery,
        kind: SearchKind,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CatalogError> {
        self.get_list(
            &format!("/search/{}", kind.as_str()),
            &[("q", query.to_string()), ("limit", limit.to_string())],
        )
    }

    fn get_stream_url(
        &self,
        id: i64,
        content_hash: &str,
        media_version: &str,
        encoding: Encoding,
    ) -> Result<String, CatalogError> {
        let doc: StreamDoc = self.get_json(
            &format!("/gw/track/{}/stream", id),
            &[
                ("hash", content_hash.to_string()),
                ("media_version", media_version.to_string()),
                ("format", encoding.code().to_string()),
            ],
        )?;
        Ok(doc.url)
    }

    fn stream_to(&self, id: i64, url: &str, out: &mut dyn Write) -> Result<u64, CatalogError> {
        debug!(track_id = id, "Streaming");
        let mut response = self.send(url, &[])?;
        response.copy_to(out).map_err(transport)
    }

    fn get_lightweight_album_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError> {
        self.get_list(&format!("/gw/album/{}/tracks", id), &[])
    }

    fn get_playlist(&self, id: i64) -> Result<PlaylistDoc, CatalogError> {
        self.get_json(&format!("/playlist/{}", id), &[])
    }

    fn get_lightweight_playlist_tracks(&self, id: i64) -> Result<Vec<LightTrack>, CatalogError> {
        self.get_list(&format!("/gw/playlist/{}/tracks", id), &[])
    }

    fn get_artist_albums(&self, id: i64) -> Result<Vec<AlbumSummary>, CatalogError> {
        self.get_list(&format!("/artist/{}/albums", id), &[])
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let bytes = self.send(url, &[])?.bytes().map_err(transport)?;
        Ok(bytes.to_vec())
    }
}
