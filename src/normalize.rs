//! String normalization shared by the resolver, the re-search and the path
//! templater.

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Opening of a featuring block inside a title: "(feat.", "(Feat.".
pub static FEAT_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(feat\.").unwrap());

/// Characters no common filesystem accepts in a path component.
pub static ILLEGAL_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).unwrap());

/// Runs of whitespace, collapsed to one space in sanitized names.
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Glyphs the catalog's search index does not match against their ASCII
/// counterparts.
const GLYPH_REPLACEMENTS: &[(&str, &str)] = &[("–", "-"), ("’", "'")];

// ============================================================================
// Search normalization
// ============================================================================

/// Replace en-dashes and typographic apostrophes with ASCII.
pub fn unify_glyphs(s: &str) -> String {
    let mut out = s.to_string();
    for (from, to) in GLYPH_REPLACEMENTS {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

/// Shortened title for the loosest search: the text before a parenthetical
/// (when "(" precedes ")"), else the text before " - ". `None` when the
/// title has neither.
pub fn search_prefix(title: &str) -> Option<&str> {
    if let (Some(open), Some(close)) = (title.find('('), title.find(')')) {
        if open < close {
            return Some(&title[..open]);
        }
    }
    title.find(" - ").map(|pos| &title[..pos])
}

// ============================================================================
// Featuring notation
// ============================================================================

pub fn has_featuring_marker(title: &str) -> bool {
    FEAT_OPEN.is_match(title)
}

/// Remove the first "(feat. ...)" block from a title.
///
/// "Song (feat. X) [Remix]" -> "Song  [Remix]" trimmed to "Song [Remix]".
/// An unterminated block drops everything after the marker.
pub fn strip_featuring(title: &str) -> String {
    let Some(m) = FEAT_OPEN.find(title) else {
        return title.to_string();
    };
    let mut out = title[..m.start()].to_string();
    if let Some(close) = title[m.end()..].find(')') {
        out.push_str(&title[m.end() + close + 1..]);
    }
    MULTI_SPACE.replace_all(out.trim(), " ").into_owned()
}

/// Join names as "A, B & C".
pub fn join_artists(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} & {}", init.join(", "), last),
    }
}

// ============================================================================
// Filenames
// ============================================================================

/// Make a string safe as a single path component.
pub fn sanitize_filename(s: &str) -> String {
    let replaced = ILLEGAL_FILENAME_CHARS.replace_all(s, "_");
    let collapsed = MULTI_SPACE.replace_all(replaced.trim(), " ");
    // Trailing dots and spaces are stripped by some filesystems, which would
    // make the written path differ from the one recorded in the playlist.
    collapsed.trim_end_matches(['.', ' ']).to_string()
}
