//! Catalog link parsing.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// `https://www.deezer.com/en/album/302127`, with or without a language
/// segment.
pub static CATALOG_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?deezer\.com/(?:[a-z]{2}(?:-[a-z]{2})?/)?(track|album|playlist|artist)/(\d+)/?$")
        .unwrap()
});

/// `album:302127`
pub static BARE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(track|album|playlist|artist):(\d+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Track,
    Album,
    Playlist,
    Artist,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Track => "track",
            LinkKind::Album => "album",
            LinkKind::Playlist => "playlist",
            LinkKind::Artist => "artist",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "track" => Some(LinkKind::Track),
            "album" => Some(LinkKind::Album),
            "playlist" => Some(LinkKind::Playlist),
            "artist" => Some(LinkKind::Artist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogLink {
    pub kind: LinkKind,
    pub id: i64,
}

impl fmt::Display for CatalogLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("URL not supported: {0}")]
pub struct UnsupportedLink(pub String);

impl FromStr for CatalogLink {
    type Err = UnsupportedLink;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let link = trimmed.split(['?', '#']).next().unwrap_or_default();

        let caps = CATALOG_URL
            .captures(link)
            .or_else(|| BARE_LINK.captures(link))
            .ok_or_else(|| UnsupportedLink(trimmed.to_string()))?;

        let kind = LinkKind::parse(&caps[1]).ok_or_else(|| UnsupportedLink(trimmed.to_string()))?;
        let id = caps[2]
            .parse()
            .map_err(|_| UnsupportedLink(trimmed.to_string()))?;
        Ok(CatalogLink { kind, id })
    }
}
