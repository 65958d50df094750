//! Filename and folder templating.
//!
//! Templates use `%placeholder%` tokens filled from the resolved track.
//! Every substituted value is sanitized as a single path component, so a
//! title can never introduce a directory separator.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{Album, ArtistRef, EntryContext, Track};
use crate::normalize::sanitize_filename;
use crate::settings::Settings;

/// A `%name%` token.
pub static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"%([a-z_]+)%").unwrap());

/// Directories derived for one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackDirs {
    /// Where the audio file goes.
    pub dir: PathBuf,
    /// Where the artist image goes, if an artist folder exists.
    pub artist_dir: Option<PathBuf>,
    /// Where the album cover goes, if an album folder exists.
    pub cover_dir: Option<PathBuf>,
    /// Where errors.txt, searched.txt and playlist.m3u8 go.
    pub extras_dir: Option<PathBuf>,
}

/// Builds on-disk names for a resolved track.
pub trait PathTemplater: Send + Sync {
    /// File stem, without extension.
    fn build_filename(&self, track: &Track, context: &EntryContext, settings: &Settings) -> String;
    fn build_filepath(&self, track: &Track, context: &EntryContext, settings: &Settings) -> TrackDirs;
}

/// Template-driven layout configured entirely by [`Settings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplatePaths;

fn component(raw: &str) -> String {
    let clean = sanitize_filename(raw);
    if clean.is_empty() {
        "_".to_string()
    } else {
        clean
    }
}

fn digits(n: u32) -> usize {
    n.max(1).to_string().len()
}

fn pad(n: u32, total: Option<u32>, settings: &Settings) -> String {
    if !settings.pad_tracks {
        return n.to_string();
    }
    let width = settings
        .padding_size
        .unwrap_or_else(|| digits(total.unwrap_or(n)));
    format!("{:0width$}", n, width = width)
}

/// Fill `%token%`s using `lookup`; unknown tokens are left as written.
fn fill(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let filled = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        lookup(&caps[1])
            .map(|v| component(&v))
            .unwrap_or_else(|| caps[0].to_string())
    });
    component(&filled)
}

fn album_artist_name(album: &Album, fallback: &ArtistRef) -> String {
    album
        .main_artist
        .as_ref()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| fallback.name.clone())
}

fn track_value(
    token: &str,
    track: &Track,
    context: &EntryContext,
    settings: &Settings,
) -> Option<String> {
    let album = &track.album;
    let value = match token {
        "title" => track.title.clone(),
        "title_clean" => track.title_clean.clone(),
        "title_feat" => track.title_with_feat.clone(),
        "artist" => track.main_artist.name.clone(),
        "artists" => track.main_artists_string.clone(),
        "album" => album.title.clone(),
        "albumartist" => album_artist_name(album, &track.main_artist),
        "tracknumber" => pad(track.track_number.unwrap_or(0), album.track_total, settings),
        "tracktotal" => album.track_total.unwrap_or(0).to_string(),
        "discnumber" => track.disc_number.unwrap_or(1).to_string(),
        "disctotal" => album.disc_total.unwrap_or(1).to_string(),
        "genre" => album.genres.first().cloned().unwrap_or_else(|| "Unknown".to_string()),
        "year" => track.effective_date().year.to_string(),
        "date" => track.effective_date().format(&settings.date_format),
        "bpm" => track.bpm.map(|b| b.round().to_string()).unwrap_or_default(),
        "label" => album.label.clone().unwrap_or_default(),
        "isrc" => track.isrc.clone().unwrap_or_default(),
        "upc" => album.barcode.clone().unwrap_or_default(),
        "explicit" => {
            if track.explicit == Some(true) {
                "(Explicit)".to_string()
            } else {
                String::new()
            }
        }
        "track_id" => track.id.to_string(),
        "album_id" => album.id.to_string(),
        "artist_id" => track.main_artist.id.to_string(),
        "position" => {
            let total = match context {
                EntryContext::PlaylistTrack(p) => p.nb_tracks,
                _ => album.track_total,
            };
            pad(track.position.unwrap_or(0), total, settings)
        }
        "playlist" => match context {
            EntryContext::PlaylistTrack(p) => p.title.clone(),
            _ => return None,
        },
        "playlist_id" => match context {
            EntryContext::PlaylistTrack(p) => p.id.to_string(),
            _ => return None,
        },
        "bitrate" => track
            .selected
            .map(|s| s.encoding.to_string())
            .unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

/// Name for an album-level file or folder (`%album%`, `%artist%`, ...).
pub fn album_name(template: &str, album: &Album, fallback_artist: &ArtistRef, settings: &Settings) -> String {
    fill(template, |token| {
        let value = match token {
            "album" => album.title.clone(),
            "artist" | "albumartist" => album_artist_name(album, fallback_artist),
            "album_id" => album.id.to_string(),
            "year" => album.date.unwrap_or_default().year.to_string(),
            "date" => album.date.unwrap_or_default().format(&settings.date_format),
            "genre" => album.genres.first().cloned().unwrap_or_else(|| "Unknown".to_string()),
            "label" => album.label.clone().unwrap_or_default(),
            "upc" => album.barcode.clone().unwrap_or_default(),
            "type" => album.record_type.clone().unwrap_or_default(),
            "tracktotal" => album.track_total.unwrap_or(0).to_string(),
            "disctotal" => album.disc_total.unwrap_or(1).to_string(),
            _ => return None,
        };
        Some(value)
    })
}

/// Name for an artist-level file or folder.
pub fn artist_name(template: &str, artist: &ArtistRef) -> String {
    fill(template, |token| match token {
        "artist" => Some(artist.name.clone()),
        "artist_id" => Some(artist.id.to_string()),
        _ => None,
    })
}

/// `target` relative to `base`, with `/` separators, as written into
/// playlist files.
pub fn relative_entry(base: &Path, target: &Path) -> Option<String> {
    let rel = target.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl PathTemplater for TemplatePaths {
    fn build_filename(&self, track: &Track, context: &EntryContext, settings: &Settings) -> String {
        let template = match context {
            EntryContext::Single => &settings.trackname_template,
            EntryContext::AlbumTrack => &settings.album_trackname_template,
            EntryContext::PlaylistTrack(_) => &settings.playlist_trackname_template,
        };
        fill(template, |token| track_value(token, track, context, settings))
    }

    fn build_filepath(&self, track: &Track, context: &EntryContext, settings: &Settings) -> TrackDirs {
        let mut dir = settings.download_location.clone();
        let mut dirs = TrackDirs::default();

        let playlist_folder = match context {
            EntryContext::PlaylistTrack(_) if settings.create_playlist_folder => {
                let name = fill(&settings.playlist_name_template, |token| {
                    track_value(token, track, context, settings)
                });
                dir.push(name);
                dirs.extras_dir = Some(dir.clone());
                true
            }
            _ => false,
        };

        let structured = match context {
            EntryContext::AlbumTrack => true,
            EntryContext::Single => settings.create_single_folder,
            EntryContext::PlaylistTrack(_) => settings.create_structure_playlist,
        };

        if structured {
            let album_artist = track
                .album
                .main_artist
                .clone()
                .unwrap_or_else(|| track.main_artist.clone());
            if settings.create_artist_folder {
                dir.push(artist_name(&settings.artist_name_template, &album_artist));
                dirs.artist_dir = Some(dir.clone());
            }
            if settings.create_album_folder {
                dir.push(album_name(
                    &settings.album_name_template,
                    &track.album,
                    &track.main_artist,
                    settings,
                ));
                if !playlist_folder {
                    dirs.extras_dir = Some(dir.clone());
                }
                dirs.cover_dir = Some(dir.clone());
            }
        }

        if dirs.extras_dir.is_none() {
            dirs.extras_dir = Some(dir.clone());
        }

        let multi_disc = track.album.disc_total.unwrap_or(1) > 1;
        if structured && multi_disc && settings.create_album_folder && settings.create_cd_folder {
            dir.push(format!("CD{}", track.disc_number.unwrap_or(1)));
        }

        dirs.dir = dir;
        dirs
    }
}
