//! Tag embedding.
//!
//! The downloader only needs "tag this file with this track"; [`LoftyTagger`]
//! does it with `lofty`, which picks the native tag format for the file
//! (ID3v2 for MP3, Vorbis comments for FLAC, ilst atoms for MP4).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{Picture, PictureType};
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};

use crate::models::Track;
use crate::settings::TagOptions;

pub trait Tagger: Send + Sync {
    fn embed_tags(&self, path: &Path, track: &Track, options: &TagOptions) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagger;

/// Text items to write, in order, filtered by `options`.
pub fn tag_items(track: &Track, options: &TagOptions) -> Vec<(ItemKey, String)> {
    let album = &track.album;
    let date = track.effective_date();
    let mut items = Vec::new();
    let mut push = |enabled: bool, key: ItemKey, value: Option<String>| {
        if let Some(value) = value.filter(|v| enabled && !v.is_empty()) {
            items.push((key, value));
        }
    };

    push(options.title, ItemKey::TrackTitle, Some(track.title.clone()));
    push(
        options.artist,
        ItemKey::TrackArtist,
        Some(
            track
                .artists_string
                .clone()
                .unwrap_or_else(|| track.main_artist.name.clone()),
        ),
    );
    push(options.album, ItemKey::AlbumTitle, Some(album.title.clone()));
    push(
        options.album_artist,
        ItemKey::AlbumArtist,
        album.main_artist.as_ref().map(|a| a.name.clone()),
    );
    push(
        options.track_number,
        ItemKey::TrackNumber,
        track.track_number.map(|n| n.to_string()),
    );
    push(
        options.track_total,
        ItemKey::TrackTotal,
        album.track_total.map(|n| n.to_string()),
    );
    push(
        options.disc_number,
        ItemKey::DiscNumber,
        track.disc_number.map(|n| n.to_string()),
    );
    push(
        options.disc_total,
        ItemKey::DiscTotal,
        album.disc_total.map(|n| n.to_string()),
    );
    push(
        options.genre,
        ItemKey::Genre,
        (!album.genres.is_empty()).then(|| album.genres.join(", ")),
    );
    push(
        options.year,
        ItemKey::Year,
        (date.year > 0).then(|| date.year.to_string()),
    );
    push(
        options.date,
        ItemKey::RecordingDate,
        (!date.is_unknown()).then(|| date.format("Y-M-D")),
    );
    push(options.isrc, ItemKey::Isrc, track.isrc.clone());
    push(
        options.bpm,
        ItemKey::Bpm,
        track.bpm.map(|b| b.round().to_string()),
    );
    push(
        options.label,
        ItemKey::Publisher,
        album.label.clone().filter(|l| l != "Unknown"),
    );
    push(
        options.barcode,
        ItemKey::Barcode,
        album.barcode.clone().filter(|b| b != "Unknown"),
    );
    push(
        options.replay_gain,
        ItemKey::ReplayGainTrackGain,
        track.replay_gain.clone(),
    );
    push(
        options.lyrics,
        ItemKey::Lyrics,
        track.lyrics.as_ref().and_then(|l| l.unsync.clone()),
    );
    push(
        options.copyright,
        ItemKey::CopyrightMessage,
        track.copyright.clone(),
    );
    items
}

fn front_cover(path: &Path) -> Result<Picture> {
    let file = File::open(path).with_context(|| format!("Failed to open cover {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut picture = Picture::from_reader(&mut reader)
        .with_context(|| format!("Failed to decode cover {:?}", path))?;
    picture.set_pic_type(PictureType::CoverFront);
    Ok(picture)
}

impl Tagger for LoftyTagger {
    fn embed_tags(&self, path: &Path, track: &Track, options: &TagOptions) -> Result<()> {
        let mut tagged_file = read_from_path(path)
            .with_context(|| format!("Failed to read tags: {:?}", path))?;
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| anyhow!("No writable tag available for {:?}", tag_type))?;

        for (key, value) in tag_items(track, options) {
            tag.insert_text(key, value);
        }

        if options.cover {
            if let Some(cover) = &track.album.pic_path {
                tag.push_picture(front_cover(cover)?);
            }
        }

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .with_context(|| format!("Failed to write tags: {:?}", path))?;
        Ok(())
    }
}
