//! Caller-facing entry points, one per catalog entity kind.
//!
//! Each entry point expands its entity into ordered [`BatchEntry`]s, runs
//! them through the batch orchestrator and hands the ordered results to the
//! aggregator. The return value is the side-artifacts directory, if any.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregate::{finalize, BatchScope};
use crate::artwork::ArtworkCache;
use crate::batch::run_batch;
use crate::catalog::{CatalogClient, LightTrack, PublicAlbum};
use crate::downloader::DownloadContext;
use crate::format::QualityTier;
use crate::link::{CatalogLink, LinkKind};
use crate::models::{BatchEntry, EntryContext};
use crate::paths::PathTemplater;
use crate::progress::create_spinner;
use crate::settings::Settings;
use crate::tagger::Tagger;

pub struct Pipeline<'a> {
    client: &'a dyn CatalogClient,
    settings: &'a Settings,
    templater: &'a dyn PathTemplater,
    tagger: &'a dyn Tagger,
    artwork: ArtworkCache,
}

/// 1-based positions, in input order.
fn positioned(records: Vec<LightTrack>) -> impl Iterator<Item = LightTrack> {
    records.into_iter().enumerate().map(|(i, mut record)| {
        record.position = Some(i as u32 + 1);
        record
    })
}

impl<'a> Pipeline<'a> {
    pub fn new(
        client: &'a dyn CatalogClient,
        settings: &'a Settings,
        templater: &'a dyn PathTemplater,
        tagger: &'a dyn Tagger,
    ) -> Self {
        Self {
            client,
            settings,
            templater,
            tagger,
            artwork: ArtworkCache::new(&settings.artwork_cache_dir),
        }
    }

    fn context(&self, quality: Option<QualityTier>) -> DownloadContext<'_> {
        DownloadContext {
            client: self.client,
            settings: self.settings,
            quality: quality.unwrap_or(self.settings.max_bitrate),
            templater: self.templater,
            tagger: self.tagger,
            artwork: &self.artwork,
        }
    }

    fn run(
        &self,
        entries: &[BatchEntry],
        title: &str,
        scope: BatchScope,
        quality: Option<QualityTier>,
    ) -> Result<Option<PathBuf>> {
        let results = run_batch(&self.context(quality), entries, title)?;
        Ok(finalize(self.client, &results, self.settings, scope))
    }

    pub fn download_track(&self, id: i64, quality: Option<QualityTier>) -> Result<Option<PathBuf>> {
        let record = self
            .client
            .get_lightweight_track(id)
            .with_context(|| format!("Failed to fetch track {}", id))?;
        let title = format!("{} - {}", record.artist_name, record.title);
        self.run(&[BatchEntry::single(record)], &title, BatchScope::Single, quality)
    }

    /// Public album document with disc total and copyright taken from the
    /// lightweight document.
    fn album_document(&self, id: i64) -> Result<PublicAlbum> {
        let mut album = self
            .client
            .get_album(id)
            .with_context(|| format!("Failed to fetch album {}", id))?;
        let light = self
            .client
            .get_lightweight_album(id)
            .with_context(|| format!("Failed to fetch album {}", id))?;
        album.nb_disk = light.disc_total.or(album.nb_disk);
        album.copyright = light.copyright.or(album.copyright);
        Ok(album)
    }

    pub fn download_album(&self, id: i64, quality: Option<QualityTier>) -> Result<Option<PathBuf>> {
        let spinner = create_spinner(&format!("Fetching album {}", id));
        let album = Arc::new(self.album_document(id)?);

        if album.nb_tracks == Some(1) {
            let track_id = album
                .track_ids()
                .first()
                .copied()
                .with_context(|| format!("Album {} lists no tracks", id))?;
            let record = self
                .client
                .get_lightweight_track(track_id)
                .with_context(|| format!("Failed to fetch track {}", track_id))?;
            spinner.finish_and_clear();
            let entry = BatchEntry {
                record,
                context: EntryContext::Single,
                album: Some(Arc::clone(&album)),
            };
            return self.run(&[entry], &album.title, BatchScope::Single, quality);
        }

        let records = self
            .client
            .get_lightweight_album_tracks(id)
            .with_context(|| format!("Failed to fetch tracks of album {}", id))?;
        spinner.finish_and_clear();
        let entries: Vec<BatchEntry> = positioned(records)
            .map(|record| BatchEntry {
                record,
                context: EntryContext::AlbumTrack,
                album: Some(Arc::clone(&album)),
            })
            .collect();
        self.run(&entries, &album.title, BatchScope::Collection, quality)
    }

    pub fn download_playlist(&self, id: i64, quality: Option<QualityTier>) -> Result<Option<PathBuf>> {
        let spinner = create_spinner(&format!("Fetching playlist {}", id));
        let playlist = self
            .client
            .get_playlist(id)
            .with_context(|| format!("Failed to fetch playlist {}", id))?;
        let records = self
            .client
            .get_lightweight_playlist_tracks(id)
            .with_context(|| format!("Failed to fetch tracks of playlist {}", id))?;
        spinner.finish_and_clear();

        let playlist = Arc::new(playlist);
        let entries: Vec<BatchEntry> = positioned(records)
            .map(|record| BatchEntry {
                record,
                context: EntryContext::PlaylistTrack(Arc::clone(&playlist)),
                album: None,
            })
            .collect();
        self.run(&entries, &playlist.title, BatchScope::Collection, quality)
    }

    /// Every album of the artist, in catalog order. A failed album is
    /// logged and skipped; the last artifacts directory produced is returned.
    pub fn download_artist(&self, id: i64, quality: Option<QualityTier>) -> Result<Option<PathBuf>> {
        let albums = self
            .client
            .get_artist_albums(id)
            .with_context(|| format!("Failed to fetch albums of artist {}", id))?;

        let mut last = None;
        for album in albums {
            info!(album_id = album.id, "Album: {}", album.title);
            match self.download_album(album.id, quality) {
                Ok(dir) => last = dir.or(last),
                Err(e) => warn!(album_id = album.id, error = %format!("{:#}", e), "Skipping album"),
            }
        }
        Ok(last)
    }

    pub fn download_link(&self, link: &CatalogLink, quality: Option<QualityTier>) -> Result<Option<PathBuf>> {
        match link.kind {
            LinkKind::Track => self.download_track(link.id, quality),
            LinkKind::Album => self.download_album(link.id, quality),
            LinkKind::Playlist => self.download_playlist(link.id, quality),
            LinkKind::Artist => self.download_artist(link.id, quality),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PLAYLIST_FILE;
    use crate::catalog::{AlbumSummary, DataList, FallbackRef, PlaylistDoc, TrackRef};
    use crate::paths::TemplatePaths;
    use crate::test_support::{light_album, light_track, public_album, FakeCatalog, RecordingTagger};
    use std::fs;
    use std::sync::atomic::Ordering;

    fn settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            download_location: dir.path().join("music"),
            artwork_cache_dir: dir.path().join("cache"),
            create_m3u8_file: true,
            ..Settings::default()
        }
    }

    fn two_track_album() -> PublicAlbum {
        PublicAlbum {
            nb_tracks: Some(2),
            ..public_album(100, "Album", "Artist")
        }
    }

    #[test]
    fn test_single_track_album_uses_fallback_without_search() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            fallback_search: true,
            ..settings(&dir)
        };
        let mut record = light_track(1, "Song", "Artist");
        record.content_hash = Some(String::new());
        record.fallback = Some(FallbackRef { id: 2 });
        let album = PublicAlbum {
            nb_tracks: Some(1),
            tracks: Some(DataList {
                data: vec![TrackRef { id: 1 }],
            }),
            ..public_album(100, "Album", "Artist")
        };
        let catalog = FakeCatalog::new()
            .with_album(album)
            .with_light_album(light_album(100, "Album", 27, "Artist"))
            .with_track(record)
            .with_track(light_track(2, "Song", "Artist"));
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);

        let out = pipeline.download_album(100, None).unwrap();
        assert_eq!(out, Some(settings.download_location.clone()));
        let file = settings.download_location.join("Artist - Song.flac");
        assert_eq!(fs::read(file).unwrap(), b"audio-2-9");
        assert_eq!(catalog.calls.search.load(Ordering::SeqCst), 0);
        // Single scope: no playlist file.
        assert!(!settings.download_location.join(PLAYLIST_FILE).exists());
    }

    #[test]
    fn test_album_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let mut second = light_track(2, "Two", "Artist");
        second.track_number = Some(2);
        let mut light = light_album(100, "Album", 27, "Artist");
        light.copyright = Some("(P) Light".into());
        let catalog = FakeCatalog::new()
            .with_album(two_track_album())
            .with_light_album(light)
            .with_album_tracks(100, vec![light_track(1, "One", "Artist"), second]);
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);

        let out = pipeline.download_album(100, None).unwrap().unwrap();
        assert_eq!(out, settings.download_location.join("Artist - Album"));
        assert_eq!(
            fs::read_to_string(out.join(PLAYLIST_FILE)).unwrap(),
            "1 - One.flac\n2 - Two.flac"
        );
        assert_eq!(sorted_positions(&tagger), vec![Some(1), Some(2)]);
        // The album document is shared with the resolver.
        assert_eq!(catalog.calls.get_album.load(Ordering::SeqCst), 1);
    }

    fn sorted_positions(tagger: &RecordingTagger) -> Vec<Option<u32>> {
        let mut positions = tagger.positions();
        positions.sort();
        positions
    }

    #[test]
    fn test_quality_override() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let catalog = FakeCatalog::new()
            .with_album(public_album(100, "Album", "Artist"))
            .with_track(light_track(1, "Song", "Artist"));
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);

        pipeline.download_track(1, Some(QualityTier::Mp3_128)).unwrap();
        let file = settings.download_location.join("Artist - Song.mp3");
        assert_eq!(fs::read(file).unwrap(), b"audio-1-1");
    }

    #[test]
    fn test_playlist_keeps_slots_for_failures() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            fallback_bitrate: false,
            ..settings(&dir)
        };
        let playlist = PlaylistDoc {
            id: 7,
            title: "Mix".into(),
            nb_tracks: Some(3),
        };
        let mut broken = light_track(2, "Two", "Artist");
        broken.filesize_flac = Some(0);
        let catalog = FakeCatalog::new()
            .with_album(public_album(100, "Album", "Artist"))
            .with_playlist(
                playlist,
                vec![
                    light_track(1, "One", "Artist"),
                    broken,
                    light_track(3, "Three", "Artist"),
                ],
            );
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);

        let out = pipeline.download_playlist(7, None).unwrap().unwrap();
        assert_eq!(out, settings.download_location.join("Mix"));
        assert_eq!(
            fs::read_to_string(out.join(PLAYLIST_FILE)).unwrap(),
            "1 - Artist - One.flac\n\n3 - Artist - Three.flac"
        );
        assert_eq!(
            fs::read_to_string(out.join("errors.txt")).unwrap(),
            "2 | Artist - Two | Track not found at desired bitrate.\r\n"
        );
    }

    #[test]
    fn test_artist_runs_each_album() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let catalog = FakeCatalog::new()
            .with_artist_albums(
                27,
                vec![
                    AlbumSummary {
                        id: 100,
                        title: "Album".into(),
                    },
                    AlbumSummary {
                        id: 404,
                        title: "Gone".into(),
                    },
                ],
            )
            .with_album(two_track_album())
            .with_light_album(light_album(100, "Album", 27, "Artist"))
            .with_album_tracks(
                100,
                vec![light_track(1, "One", "Artist"), light_track(2, "Two", "Artist")],
            );
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);

        let link: CatalogLink = "artist:27".parse().unwrap();
        let out = pipeline.download_link(&link, None).unwrap();
        assert_eq!(out, Some(settings.download_location.join("Artist - Album")));
        assert_eq!(tagger.tagged().len(), 2);
        assert_eq!(catalog.calls.get_album.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_track_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let catalog = FakeCatalog::new();
        let tagger = RecordingTagger::default();
        let pipeline = Pipeline::new(&catalog, &settings, &TemplatePaths, &tagger);
        assert!(pipeline.download_track(9, None).is_err());
    }
}
