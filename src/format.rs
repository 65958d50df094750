//! Encoding selection.
//!
//! Two families never mix: stereo (FLAC, MP3 320, MP3 128, plus the
//! catalog's always-present default stream) and 360 spatial audio. The
//! requested tier alone decides the family.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::InvalidTier;
use crate::models::{FileSizes, SelectedFormat};

// ============================================================================
// Encodings and tiers
// ============================================================================

/// A concrete encoding the catalog can stream. Discriminants are the
/// catalog's format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Flac = 9,
    Mp3_320 = 3,
    Mp3_128 = 1,
    /// Sub-128 default stream; every encoded track has one.
    Mp3Default = 8,
    Ra360Hq = 15,
    Ra360Mq = 14,
    Ra360Lq = 13,
}

impl Encoding {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Flac => ".flac",
            Encoding::Mp3_320 | Encoding::Mp3_128 | Encoding::Mp3Default => ".mp3",
            Encoding::Ra360Hq | Encoding::Ra360Mq | Encoding::Ra360Lq => ".mp4",
        }
    }

    pub fn is_lossless(self) -> bool {
        self == Encoding::Flac
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Flac => "FLAC",
            Encoding::Mp3_320 => "MP3 320",
            Encoding::Mp3_128 => "MP3 128",
            Encoding::Mp3Default => "MP3",
            Encoding::Ra360Hq => "360 HQ",
            Encoding::Ra360Mq => "360 MQ",
            Encoding::Ra360Lq => "360 LQ",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierFamily {
    Stereo,
    Spatial,
}

/// A quality the user can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityTier {
    #[default]
    Flac,
    Mp3_320,
    Mp3_128,
    Ra360Hq,
    Ra360Mq,
    Ra360Lq,
}

const STEREO_LADDER: [QualityTier; 3] = [QualityTier::Flac, QualityTier::Mp3_320, QualityTier::Mp3_128];

const SPATIAL_LADDER: [QualityTier; 3] = [
    QualityTier::Ra360Hq,
    QualityTier::Ra360Mq,
    QualityTier::Ra360Lq,
];

impl QualityTier {
    pub fn family(self) -> TierFamily {
        match self {
            QualityTier::Flac | QualityTier::Mp3_320 | QualityTier::Mp3_128 => TierFamily::Stereo,
            QualityTier::Ra360Hq | QualityTier::Ra360Mq | QualityTier::Ra360Lq => {
                TierFamily::Spatial
            }
        }
    }

    pub fn encoding(self) -> Encoding {
        match self {
            QualityTier::Flac => Encoding::Flac,
            QualityTier::Mp3_320 => Encoding::Mp3_320,
            QualityTier::Mp3_128 => Encoding::Mp3_128,
            QualityTier::Ra360Hq => Encoding::Ra360Hq,
            QualityTier::Ra360Mq => Encoding::Ra360Mq,
            QualityTier::Ra360Lq => Encoding::Ra360Lq,
        }
    }

    /// The requested tier followed by every strictly lower tier of its family.
    fn ladder(self) -> &'static [QualityTier] {
        let ladder: &'static [QualityTier] = match self.family() {
            TierFamily::Stereo => &STEREO_LADDER,
            TierFamily::Spatial => &SPATIAL_LADDER,
        };
        let start = ladder.iter().position(|t| *t == self).unwrap_or(0);
        &ladder[start..]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Flac => "flac",
            QualityTier::Mp3_320 => "mp3_320",
            QualityTier::Mp3_128 => "mp3_128",
            QualityTier::Ra360Hq => "360_hq",
            QualityTier::Ra360Mq => "360_mq",
            QualityTier::Ra360Lq => "360_lq",
        }
    }
}

impl FromStr for QualityTier {
    type Err = InvalidTier;

    /// Accepts tier names, a few common aliases and the catalog's numeric
    /// format codes. Anything else is a configuration error, never a guess.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flac" | "lossless" | "9" => Ok(QualityTier::Flac),
            "mp3_320" | "320" | "3" => Ok(QualityTier::Mp3_320),
            "mp3_128" | "128" | "1" => Ok(QualityTier::Mp3_128),
            "360_hq" | "360" | "15" => Ok(QualityTier::Ra360Hq),
            "360_mq" | "14" => Ok(QualityTier::Ra360Mq),
            "360_lq" | "13" => Ok(QualityTier::Ra360Lq),
            _ => Err(InvalidTier(s.to_string())),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QualityTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let text = match raw {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => other.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Why no encoding could be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Exact tier requested with fallback disabled, and that tier is absent.
    BitrateUnavailable,
    /// Spatial ladder exhausted; spatial audio has no stereo fallback.
    FormatUnsupported,
}

/// Pick the best obtainable encoding for `requested`.
///
/// - Without fallback only the requested tier's size is consulted.
/// - With fallback the family's ladder is walked downward from the requested
///   tier; the first tier with a non-zero size wins. A stereo walk that finds
///   nothing falls back to the default stream (never fails), a spatial walk
///   that finds nothing fails.
pub fn select(
    sizes: &FileSizes,
    requested: QualityTier,
    allow_fallback: bool,
) -> Result<SelectedFormat, SelectError> {
    if !allow_fallback {
        let encoding = requested.encoding();
        let size = sizes.size_of(encoding);
        return if size > 0 {
            Ok(SelectedFormat { encoding, size })
        } else {
            Err(SelectError::BitrateUnavailable)
        };
    }

    for tier in requested.ladder() {
        let encoding = tier.encoding();
        let size = sizes.size_of(encoding);
        if size > 0 {
            return Ok(SelectedFormat { encoding, size });
        }
    }

    match requested.family() {
        TierFamily::Stereo => Ok(SelectedFormat {
            encoding: Encoding::Mp3Default,
            size: sizes.default,
        }),
        TierFamily::Spatial => Err(SelectError::FormatUnsupported),
    }
}
