//! Download settings, loaded from a TOML file with per-field defaults.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::format::QualityTier;
use crate::safety::ensure_disjoint;

/// Which tag fields the tagger writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TagOptions {
    pub title: bool,
    pub artist: bool,
    pub album: bool,
    pub cover: bool,
    pub track_number: bool,
    pub track_total: bool,
    pub disc_number: bool,
    pub disc_total: bool,
    pub album_artist: bool,
    pub genre: bool,
    pub year: bool,
    pub date: bool,
    pub isrc: bool,
    pub bpm: bool,
    pub label: bool,
    pub barcode: bool,
    pub replay_gain: bool,
    pub lyrics: bool,
    pub copyright: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            title: true,
            artist: true,
            album: true,
            cover: true,
            track_number: true,
            track_total: false,
            disc_number: true,
            disc_total: false,
            album_artist: true,
            genre: true,
            year: true,
            date: true,
            isrc: true,
            bpm: true,
            label: true,
            barcode: true,
            replay_gain: false,
            lyrics: false,
            copyright: false,
        }
    }
}

/// How the artist tag is built from the contributor list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MultitagSeparator {
    /// Leave the artist tag to the tagger (main artist name).
    #[default]
    Default,
    /// Main artists, then " feat. ..." when there are featured artists.
    AndFeat,
    /// Every artist joined with this separator.
    Literal(String),
}

impl<'de> Deserialize<'de> for MultitagSeparator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "default" => MultitagSeparator::Default,
            "andFeat" => MultitagSeparator::AndFeat,
            _ => MultitagSeparator::Literal(raw),
        })
    }
}

impl fmt::Display for MultitagSeparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultitagSeparator::Default => f.write_str("default"),
            MultitagSeparator::AndFeat => f.write_str("andFeat"),
            MultitagSeparator::Literal(sep) => write!(f, "{sep:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_location: PathBuf,
    pub artwork_cache_dir: PathBuf,

    pub trackname_template: String,
    pub album_trackname_template: String,
    pub playlist_trackname_template: String,
    pub artist_name_template: String,
    pub album_name_template: String,
    pub playlist_name_template: String,
    pub cover_image_template: String,
    pub artist_image_template: String,
    pub date_format: String,
    /// Fixed track-number width; derived from the track total when unset.
    pub padding_size: Option<usize>,
    pub pad_tracks: bool,

    pub create_playlist_folder: bool,
    pub create_structure_playlist: bool,
    pub create_artist_folder: bool,
    pub create_album_folder: bool,
    pub create_cd_folder: bool,
    pub create_single_folder: bool,

    pub max_bitrate: QualityTier,
    pub fallback_bitrate: bool,
    pub fallback_search: bool,

    pub log_errors: bool,
    pub log_searched: bool,
    pub create_m3u8_file: bool,
    pub synced_lyrics: bool,
    pub save_artwork: bool,
    pub save_artwork_artist: bool,
    pub embedded_artwork_size: u32,
    pub local_artwork_size: u32,
    pub png_covers: bool,

    pub tags: TagOptions,
    pub multitag_separator: MultitagSeparator,

    pub queue_concurrency: usize,
    pub execute_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        let download_location = dirs::audio_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-fetch");
        Self {
            download_location,
            artwork_cache_dir: std::env::temp_dir().join("catalog-fetch-imgs"),
            trackname_template: "%artist% - %title%".to_string(),
            album_trackname_template: "%tracknumber% - %title%".to_string(),
            playlist_trackname_template: "%position% - %artist% - %title%".to_string(),
            artist_name_template: "%artist%".to_string(),
            album_name_template: "%artist% - %album%".to_string(),
            playlist_name_template: "%playlist%".to_string(),
            cover_image_template: "cover".to_string(),
            artist_image_template: "folder".to_string(),
            date_format: "Y-M-D".to_string(),
            padding_size: None,
            pad_tracks: true,
            create_playlist_folder: true,
            create_structure_playlist: false,
            create_artist_folder: false,
            create_album_folder: true,
            create_cd_folder: true,
            create_single_folder: false,
            max_bitrate: QualityTier::Flac,
            fallback_bitrate: true,
            fallback_search: false,
            log_errors: true,
            log_searched: false,
            create_m3u8_file: false,
            synced_lyrics: false,
            save_artwork: true,
            save_artwork_artist: false,
            embedded_artwork_size: 800,
            local_artwork_size: 1400,
            png_covers: false,
            tags: TagOptions::default(),
            multitag_separator: MultitagSeparator::Default,
            queue_concurrency: 3,
            execute_command: String::new(),
        }
    }
}

impl Settings {
    /// Read and validate a TOML settings file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_concurrency == 0 {
            bail!("queue_concurrency must be at least 1");
        }
        if self.embedded_artwork_size == 0 || self.local_artwork_size == 0 {
            bail!("artwork sizes must be positive");
        }
        if self.padding_size == Some(0) {
            bail!("padding_size must be at least 1 when set");
        }
        ensure_disjoint(&self.download_location, &self.artwork_cache_dir)?;
        Ok(())
    }

    /// `execute_command` with `%folder%` filled in; `None` when unset.
    pub fn post_command(&self, folder: &Path) -> Option<String> {
        let template = self.execute_command.trim();
        if template.is_empty() {
            return None;
        }
        Some(template.replace("%folder%", &folder.to_string_lossy()))
    }

    /// Extension used for every image written by the pipeline.
    pub fn image_extension(&self) -> &'static str {
        if self.png_covers {
            "png"
        } else {
            "jpg"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_bitrate, QualityTier::Flac);
        assert!(settings.fallback_bitrate);
        assert!(!settings.fallback_search);
        assert_eq!(settings.queue_concurrency, 3);
        assert_eq!(settings.image_extension(), "jpg");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(&format!(
            r#"
download_location = "{}"
max_bitrate = "mp3_320"
fallback_search = true
multitag_separator = "andFeat"

[tags]
bpm = false
"#,
            dir.path().join("music").display()
        ));
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.max_bitrate, QualityTier::Mp3_320);
        assert!(settings.fallback_search);
        assert_eq!(settings.multitag_separator, MultitagSeparator::AndFeat);
        assert!(!settings.tags.bpm);
        assert!(settings.tags.title);
        assert_eq!(settings.trackname_template, "%artist% - %title%");
    }

    #[test]
    fn test_numeric_tier_code() {
        let file = write_config("max_bitrate = 14\n");
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.max_bitrate, QualityTier::Ra360Mq);
    }

    #[test]
    fn test_unknown_tier_is_rejected() {
        let file = write_config("max_bitrate = 7\n");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown quality tier"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let settings = Settings {
            queue_concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_literal_separator() {
        let file = write_config("multitag_separator = \"; \"\n");
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(
            settings.multitag_separator,
            MultitagSeparator::Literal("; ".to_string())
        );
    }

    #[test]
    fn test_post_command() {
        let mut settings = Settings::default();
        assert_eq!(settings.post_command(Path::new("/music/Album")), None);
        settings.execute_command = "beet import \"%folder%\"".to_string();
        assert_eq!(
            settings.post_command(Path::new("/music/Album")).as_deref(),
            Some("beet import \"/music/Album\"")
        );
    }
}
