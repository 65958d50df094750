//! Single-track download.
//!
//! One track moves through `Resolving -> Selecting -> Streaming` in a plain
//! loop. A missing content hash or a refused stream hands control to the
//! [`FallbackState`], whose answer sends the loop back to `Resolving` (new
//! record) or `Selecting` (lower bitrate), or ends it. Every retry consumes
//! one of a fixed number of attempts.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::artwork::{image_url, ArtworkCache, ImageKind};
use crate::catalog::{CatalogClient, LightTrack};
use crate::error::{CatalogError, DownloadError, RetryTrigger};
use crate::fallback::{FallbackPolicy, FallbackState, Transition, MAX_ATTEMPTS};
use crate::format::{select, QualityTier, SelectError};
use crate::models::{ArtworkRequest, BatchEntry, DownloadResult, Track, TrackSuccess};
use crate::paths::{album_name, artist_name, relative_entry, PathTemplater};
use crate::safety::write_atomic;
use crate::settings::{MultitagSeparator, Settings};
use crate::tagger::Tagger;

/// Collaborators shared by every download of a batch.
pub struct DownloadContext<'a> {
    pub client: &'a dyn CatalogClient,
    pub settings: &'a Settings,
    /// Effective tier: the per-request override or `settings.max_bitrate`.
    pub quality: QualityTier,
    pub templater: &'a dyn PathTemplater,
    pub tagger: &'a dyn Tagger,
    pub artwork: &'a ArtworkCache,
}

enum Stage {
    Resolving { record: LightTrack, via_search: bool },
    Selecting(Track),
    Streaming(Track),
}

enum StreamFailure {
    /// Refused with 403/404; eligible for the fallback chain.
    Unavailable,
    Fatal(DownloadError),
}

/// Artist tag value for the configured multitag mode.
pub fn artists_tag(track: &Track, separator: &MultitagSeparator) -> Option<String> {
    match separator {
        MultitagSeparator::Default => None,
        MultitagSeparator::AndFeat => Some(match &track.feat_artists_string {
            Some(feat) => format!("{} {}", track.main_artists_string, feat),
            None => track.main_artists_string.clone(),
        }),
        MultitagSeparator::Literal(sep) => Some(track.artists.join(sep)),
    }
}

fn failed(track: Track, err: DownloadError, extras_dir: Option<PathBuf>) -> DownloadResult {
    error!(
        track_id = track.id,
        "{} - {}: {}", track.main_artist.name, track.title, err
    );
    DownloadResult::failed(track, err, extras_dir)
}

/// Download one entry. Never panics on catalog or disk trouble: every
/// failure becomes [`DownloadResult::Failed`].
pub fn download(ctx: &DownloadContext<'_>, entry: &BatchEntry) -> DownloadResult {
    let settings = ctx.settings;
    let policy = FallbackPolicy::from_settings(settings);
    let position = entry.record.position;

    let mut resolver = crate::resolver::Resolver::new(ctx.client);
    let mut state = FallbackState::new(entry.record.id);
    let mut retries = 0usize;
    let mut searched = false;
    let mut extras_dir: Option<PathBuf> = None;

    let mut stage = Stage::Resolving {
        record: entry.record.clone(),
        via_search: false,
    };

    loop {
        // The retry decision, shared by both triggers.
        let mut retry = |mut track: Track,
                         trigger: RetryTrigger,
                         extras_dir: &Option<PathBuf>|
         -> Result<Stage, DownloadResult> {
            retries += 1;
            if retries >= MAX_ATTEMPTS {
                return Err(failed(track, DownloadError::exhausted(trigger), extras_dir.clone()));
            }
            match state.decide(ctx.client, &mut track, trigger, policy) {
                Transition::Refetch { record, via_search } => {
                    debug!(track_id = track.id, replacement = record.id, retries, "Retrying");
                    Ok(Stage::Resolving { record, via_search })
                }
                Transition::StepDown => Ok(Stage::Selecting(track)),
                Transition::Fail(err) => Err(failed(track, err, extras_dir.clone())),
            }
        };

        stage = match stage {
            Stage::Resolving { record, via_search } => {
                searched |= via_search;
                let snapshot = Track::partial(&record);
                let resolved = if record.id == entry.record.id {
                    resolver.resolve(record, None, entry.album.as_ref())
                } else {
                    resolver.resolve(record, None, None)
                };
                let mut track = match resolved {
                    Ok(track) => track,
                    Err(e) => return failed(snapshot, DownloadError::CatalogApi(e), extras_dir),
                };
                track.position = position.or(track.position);
                track.searched = searched;

                if track.local {
                    return failed(track, DownloadError::LocalTrack, extras_dir);
                }
                info!(
                    track_id = track.id,
                    "Downloading: {} - {}", track.main_artist.name, track.title
                );
                if track.has_content_hash() {
                    Stage::Selecting(track)
                } else {
                    match retry(track, RetryTrigger::NotEncoded, &extras_dir) {
                        Ok(next) => next,
                        Err(result) => return result,
                    }
                }
            }

            Stage::Selecting(mut track) => {
                match select(&track.sizes, ctx.quality, settings.fallback_bitrate) {
                    Ok(selected) => {
                        debug!(track_id = track.id, encoding = %selected.encoding, "Selected format");
                        track.selected = Some(selected);
                        Stage::Streaming(track)
                    }
                    Err(SelectError::BitrateUnavailable) => {
                        return failed(track, DownloadError::BitrateUnavailable, extras_dir)
                    }
                    Err(SelectError::FormatUnsupported) => {
                        return failed(track, DownloadError::FormatUnsupported, extras_dir)
                    }
                }
            }

            Stage::Streaming(mut track) => {
                match stream_track(ctx, entry, &mut track, &mut extras_dir) {
                    Ok(success) => {
                        info!(track_id = track.id, "Done!");
                        return DownloadResult::Done(Box::new(success));
                    }
                    Err(StreamFailure::Fatal(err)) => return failed(track, err, extras_dir),
                    Err(StreamFailure::Unavailable) => {
                        match retry(track, RetryTrigger::StreamUnavailable, &extras_dir) {
                            Ok(next) => next,
                            Err(result) => return result,
                        }
                    }
                }
            }
        };
    }
}

/// Paths, side files and the audio transfer for a selected track.
fn stream_track(
    ctx: &DownloadContext<'_>,
    entry: &BatchEntry,
    track: &mut Track,
    extras_dir: &mut Option<PathBuf>,
) -> Result<TrackSuccess, StreamFailure> {
    let settings = ctx.settings;
    let Some(selected) = track.selected else {
        return Err(StreamFailure::Fatal(DownloadError::BitrateUnavailable));
    };
    let ext = settings.image_extension();

    let filename = ctx.templater.build_filename(track, &entry.context, settings);
    let dirs = ctx.templater.build_filepath(track, &entry.context, settings);
    *extras_dir = dirs.extras_dir.clone();

    // Cover for embedding, fetched once per album and size.
    if let Some(pic) = track.album.pic.clone() {
        let url = image_url(ImageKind::Cover, &pic, settings.embedded_artwork_size, ext);
        let cache_path = ctx
            .artwork
            .cover_path(track.album.id, settings.embedded_artwork_size, ext);
        track.album.pic_path = ctx.artwork.fetch(ctx.client, &url, &cache_path);
    }

    fs::create_dir_all(&dirs.dir)
        .map_err(|e| StreamFailure::Fatal(DownloadError::io(&dirs.dir, e)))?;
    let write_path = dirs
        .dir
        .join(format!("{}{}", filename, selected.encoding.extension()));

    let album_art = match (&dirs.cover_dir, &track.album.pic) {
        (Some(dir), Some(pic)) => {
            let name = album_name(
                &settings.cover_image_template,
                &track.album,
                &track.main_artist,
                settings,
            );
            let same_size = settings.embedded_artwork_size == settings.local_artwork_size;
            Some(ArtworkRequest {
                url: image_url(ImageKind::Cover, pic, settings.local_artwork_size, ext),
                path: dir.join(format!("{}.{}", name, ext)),
                cached: track.album.pic_path.clone().filter(|_| same_size),
            })
        }
        _ => None,
    };

    let artist_art = match (&dirs.artist_dir, &track.album.main_artist) {
        (Some(dir), Some(artist)) => artist.pic.as_ref().map(|pic| ArtworkRequest {
            url: image_url(ImageKind::Artist, pic, settings.local_artwork_size, ext),
            path: dir.join(format!(
                "{}.{}",
                artist_name(&settings.artist_image_template, artist),
                ext
            )),
            cached: None,
        }),
        _ => None,
    };

    let playlist_entry = dirs
        .extras_dir
        .as_deref()
        .and_then(|extras| relative_entry(extras, &write_path));

    track.artists_string = artists_tag(track, &settings.multitag_separator);

    transfer(ctx.client, track, &write_path)?;

    let mut lyrics_path = None;
    if settings.synced_lyrics {
        if let Some(sync) = track.lyrics.as_ref().and_then(|l| l.sync.as_deref()) {
            let path = dirs.dir.join(format!("{}.lrc", filename));
            match write_atomic(&path, sync.as_bytes()) {
                Ok(()) => lyrics_path = Some(path),
                Err(e) => warn!(path = %path.display(), error = %e, "Couldn't write lyrics"),
            }
        }
    }

    if let Err(e) = ctx.tagger.embed_tags(&write_path, track, &settings.tags) {
        warn!(track_id = track.id, error = %format!("{:#}", e), "Couldn't tag file");
    }

    Ok(TrackSuccess {
        path: write_path,
        extras_dir: dirs.extras_dir,
        playlist_entry,
        lyrics_path,
        album_art,
        artist_art,
        searched: track
            .searched
            .then(|| format!("{} - {}", track.main_artist.name, track.title)),
    })
}

/// Stream the selected encoding into `path`. A failed transfer never leaves
/// a partial file behind.
fn transfer(
    client: &dyn CatalogClient,
    track: &Track,
    path: &std::path::Path,
) -> Result<u64, StreamFailure> {
    let Some(selected) = track.selected else {
        return Err(StreamFailure::Fatal(DownloadError::BitrateUnavailable));
    };
    let hash = track.content_hash.as_deref().unwrap_or_default();

    let classify = |e: CatalogError| {
        if e.is_unavailable() {
            StreamFailure::Unavailable
        } else {
            StreamFailure::Fatal(DownloadError::CatalogApi(e))
        }
    };

    let url = client
        .get_stream_url(track.id, hash, &track.media_version, selected.encoding)
        .map_err(classify)?;

    let file = File::create(path).map_err(|e| StreamFailure::Fatal(DownloadError::io(path, e)))?;
    let mut writer = BufWriter::with_capacity(256 * 1024, file);
    let streamed = client
        .stream_to(track.id, &url, &mut writer)
        .map_err(classify)
        .and_then(|n| {
            writer
                .flush()
                .map(|_| n)
                .map_err(|e| StreamFailure::Fatal(DownloadError::io(path, e)))
        });
    drop(writer);

    if streamed.is_err() {
        fs::remove_file(path).ok();
    }
    streamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FallbackRef, LyricsDoc, SyncLine};
    use crate::format::Encoding;
    use crate::models::EntryContext;
    use crate::paths::TemplatePaths;
    use crate::test_support::{light_track, public_album, FakeCatalog, RecordingTagger};
    use std::sync::atomic::Ordering;

    struct Harness {
        _dir: tempfile::TempDir,
        settings: Settings,
        artwork: ArtworkCache,
        tagger: RecordingTagger,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = Settings {
                download_location: dir.path().join("music"),
                artwork_cache_dir: dir.path().join("cache"),
                ..Settings::default()
            };
            let artwork = ArtworkCache::new(dir.path().join("cache"));
            Self {
                _dir: dir,
                settings,
                artwork,
                tagger: RecordingTagger::default(),
            }
        }

        fn run(&self, catalog: &FakeCatalog, entry: &BatchEntry) -> DownloadResult {
            let ctx = DownloadContext {
                client: catalog,
                settings: &self.settings,
                quality: self.settings.max_bitrate,
                templater: &TemplatePaths,
                tagger: &self.tagger,
                artwork: &self.artwork,
            };
            download(&ctx, entry)
        }
    }

    fn catalog() -> FakeCatalog {
        FakeCatalog::new().with_album(public_album(100, "Album", "Artist"))
    }

    fn expect_done(result: DownloadResult) -> TrackSuccess {
        match result {
            DownloadResult::Done(success) => *success,
            DownloadResult::Failed(f) => panic!("download failed: {}", f.error),
        }
    }

    fn expect_failed(result: DownloadResult) -> crate::models::TrackFailure {
        match result {
            DownloadResult::Failed(f) => f,
            DownloadResult::Done(s) => panic!("unexpected success: {:?}", s.path),
        }
    }

    #[test]
    fn test_successful_download() {
        let h = Harness::new();
        let catalog = catalog();
        let entry = BatchEntry::single(light_track(1, "Song", "Artist"));

        let success = expect_done(h.run(&catalog, &entry));
        assert_eq!(success.path.extension().unwrap(), "flac");
        assert_eq!(fs::read(&success.path).unwrap(), b"audio-1-9");
        assert_eq!(success.playlist_entry.as_deref(), Some("Artist - Song.flac"));
        assert_eq!(success.searched, None);
        assert!(h.artwork.cover_path(100, 800, "jpg").is_file());
        assert_eq!(h.tagger.tagged(), vec![(success.path.clone(), 1)]);
    }

    #[test]
    fn test_self_fallback_retries_once() {
        let h = Harness::new();
        let mut record = light_track(1, "Song", "Artist");
        record.content_hash = Some(String::new());
        record.fallback = Some(FallbackRef { id: 1 });
        let catalog = catalog().with_track(record.clone());

        let failure = expect_failed(h.run(&catalog, &BatchEntry::single(record)));
        assert!(matches!(failure.error, DownloadError::TrackNotEncoded));
        // Id 1 is resolved from the entry record and never fetched again.
        assert_eq!(catalog.calls.get_lightweight_track.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.calls.get_full_track.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.calls.search.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.calls.stream_to.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_flac_steps_down() {
        let h = Harness::new();
        let catalog = catalog().refuse_stream(1, Some(Encoding::Flac));
        let entry = BatchEntry::single(light_track(1, "Song", "Artist"));

        let success = expect_done(h.run(&catalog, &entry));
        assert_eq!(success.path.extension().unwrap(), "mp3");
        assert_eq!(fs::read(&success.path).unwrap(), b"audio-1-3");
        let leftovers: Vec<_> = fs::read_dir(success.path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "flac"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_refused_stream_uses_fallback_and_keeps_position() {
        let h = Harness::new();
        let mut record = light_track(1, "Song", "Artist");
        record.fallback = Some(FallbackRef { id: 2 });
        record.position = Some(4);
        let catalog = catalog()
            .refuse_stream(1, None)
            .with_track(light_track(2, "Song", "Artist"));

        let success = expect_done(h.run(&catalog, &BatchEntry::single(record)));
        assert_eq!(fs::read(&success.path).unwrap(), b"audio-2-9");
        assert_eq!(h.tagger.tagged()[0].1, 2);
        assert_eq!(h.tagger.positions(), vec![Some(4)]);
    }

    #[test]
    fn test_search_alternative_is_noted() {
        let mut h = Harness::new();
        h.settings.fallback_search = true;
        let mut record = light_track(1, "Song", "Artist");
        record.content_hash = Some(String::new());
        let catalog = catalog()
            .with_search(r#"artist:"Artist" track:"Song" album:"Album""#, 5)
            .with_track(light_track(5, "Song", "Artist"));

        let success = expect_done(h.run(&catalog, &BatchEntry::single(record)));
        assert_eq!(success.searched.as_deref(), Some("Artist - Song"));
    }

    #[test]
    fn test_unencoded_without_alternatives_fails() {
        let mut h = Harness::new();
        h.settings.fallback_search = true;
        let mut record = light_track(1, "Song", "Artist");
        record.content_hash = Some(String::new());
        let catalog = catalog();

        let failure = expect_failed(h.run(&catalog, &BatchEntry::single(record)));
        assert_eq!(
            failure.error.to_string(),
            "Track not yet encoded and no alternative found!"
        );
        assert_eq!(failure.track.title, "Song");
    }

    #[test]
    fn test_exact_bitrate_missing() {
        let mut h = Harness::new();
        h.settings.fallback_bitrate = false;
        let mut record = light_track(1, "Song", "Artist");
        record.filesize_flac = Some(0);
        let catalog = catalog();

        let failure = expect_failed(h.run(&catalog, &BatchEntry::single(record)));
        assert!(matches!(failure.error, DownloadError::BitrateUnavailable));
        assert_eq!(catalog.calls.stream_to.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_spatial_request_without_spatial_sizes() {
        let h = Harness::new();
        let catalog = catalog();
        let ctx = DownloadContext {
            client: &catalog,
            settings: &h.settings,
            quality: QualityTier::Ra360Hq,
            templater: &TemplatePaths,
            tagger: &h.tagger,
            artwork: &h.artwork,
        };
        let failure = expect_failed(download(
            &ctx,
            &BatchEntry::single(light_track(1, "Song", "Artist")),
        ));
        assert!(matches!(failure.error, DownloadError::FormatUnsupported));
    }

    #[test]
    fn test_local_track_fails_without_network() {
        let h = Harness::new();
        let catalog = FakeCatalog::new();
        let failure = expect_failed(h.run(
            &catalog,
            &BatchEntry::single(light_track(-3, "Upload", "Me")),
        ));
        assert!(matches!(failure.error, DownloadError::LocalTrack));
        assert_eq!(catalog.calls.total(), 0);
    }

    #[test]
    fn test_synced_lyrics_sidecar() {
        let mut h = Harness::new();
        h.settings.synced_lyrics = true;
        let mut record = light_track(1, "Song", "Artist");
        record.lyrics_id = Some(9);
        record.lyrics = Some(LyricsDoc {
            text: None,
            sync: Some(vec![SyncLine {
                lrc_timestamp: Some("[00:01.00]".into()),
                line: "hello".into(),
            }]),
        });
        let catalog = catalog();

        let success = expect_done(h.run(&catalog, &BatchEntry::single(record)));
        let lrc = success.lyrics_path.unwrap();
        assert_eq!(lrc.extension().unwrap(), "lrc");
        assert_eq!(fs::read_to_string(lrc).unwrap(), "[00:01.00]hello\r\n");
    }

    #[test]
    fn test_failed_stream_leaves_no_sidecar() {
        let mut h = Harness::new();
        h.settings.synced_lyrics = true;
        let mut record = light_track(1, "Song", "Artist");
        record.lyrics_id = Some(9);
        record.lyrics = Some(LyricsDoc {
            text: None,
            sync: Some(vec![SyncLine {
                lrc_timestamp: Some("[00:01.00]".into()),
                line: "hello".into(),
            }]),
        });
        let catalog = catalog().refuse_stream(1, None);

        let failure = expect_failed(h.run(&catalog, &BatchEntry::single(record)));
        assert!(matches!(failure.error, DownloadError::StreamUnavailable));
        let sidecars = fs::read_dir(&h.settings.download_location)
            .map(|dir| {
                dir.filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|x| x == "lrc"))
                    .count()
            })
            .unwrap_or(0);
        assert_eq!(sidecars, 0);
    }

    #[test]
    fn test_tag_failure_is_not_fatal() {
        let h = Harness {
            tagger: RecordingTagger::failing(),
            ..Harness::new()
        };
        let catalog = catalog();
        let result = h.run(&catalog, &BatchEntry::single(light_track(1, "Song", "Artist")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_album_track_artwork_requests() {
        let mut h = Harness::new();
        h.settings.create_artist_folder = true;
        let catalog = catalog();
        let entry = BatchEntry {
            record: light_track(1, "Song", "Artist"),
            context: EntryContext::AlbumTrack,
            album: None,
        };

        let success = expect_done(h.run(&catalog, &entry));
        let album_art = success.album_art.unwrap();
        assert!(album_art.url.contains("/cover/albumpic/1400x1400-"));
        assert_eq!(album_art.path.file_name().unwrap(), "cover.jpg");
        assert_eq!(album_art.cached, None);
        let artist_art = success.artist_art.unwrap();
        assert!(artist_art.url.contains("/artist/artistpic/1400x1400-"));
        assert_eq!(artist_art.path.file_name().unwrap(), "folder.jpg");
        assert_eq!(success.playlist_entry.as_deref(), Some("01 - Song.flac"));
    }

    #[test]
    fn test_multitag_and_feat() {
        let track = Track {
            main_artists_string: "A & B".into(),
            feat_artists_string: Some("feat. C".into()),
            artists: vec!["A".into(), "B".into(), "C".into()],
            ..Track::default()
        };
        assert_eq!(artists_tag(&track, &MultitagSeparator::Default), None);
        assert_eq!(
            artists_tag(&track, &MultitagSeparator::AndFeat).as_deref(),
            Some("A & B feat. C")
        );
        assert_eq!(
            artists_tag(&track, &MultitagSeparator::Literal("; ".into())).as_deref(),
            Some("A; B; C")
        );
    }
}
