//! Parser for broken-link candidates.
//!
//! The importer leaves unresolvable references in a dotted
//! `space.title[@attachment]` shape. Dots and `@` inside a segment can be
//! escaped with a backslash. Several shapes match the pattern without being
//! broken links; those are disqualified here so the rewriter never repairs a
//! reference it should not touch.

use thiserror::Error;

use crate::model::HOME_TITLE;

/// A reference in the importer's broken-link shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    pub space: String,
    pub title: String,
    pub attachment: Option<String>,
}

/// Why a dotted reference is not a broken-link candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Disqualified {
    #[error("no unescaped dot separating space and title")]
    NoSeparator,
    #[error("empty space or title segment")]
    EmptySegment,
    #[error("title contains an unescaped dot")]
    DottedTitle,
    #[error("title is the default home page name")]
    HomePageTitle,
    #[error("attachment marker without a file name")]
    EmptyAttachment,
}

/// One scanned character with its escape state.
fn scan(raw: &str) -> Vec<(char, bool)> {
    let mut out = Vec::with_capacity(raw.len());
    let mut escaped = false;
    for ch in raw.chars() {
        if escaped {
            out.push((ch, true));
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push((ch, false));
        }
    }
    // A trailing lone backslash is kept literally.
    if escaped {
        out.push(('\\', true));
    }
    out
}

fn collect(chars: &[(char, bool)]) -> String {
    chars.iter().map(|(ch, _)| *ch).collect()
}

fn find_unescaped(chars: &[(char, bool)], needle: char) -> Option<usize> {
    chars
        .iter()
        .position(|(ch, escaped)| *ch == needle && !escaped)
}

/// Parses `raw` as a broken-link candidate, or reports why it must be left alone.
pub fn parse_candidate(raw: &str) -> Result<BrokenLink, Disqualified> {
    let chars = scan(raw);

    let dot = find_unescaped(&chars, '.').ok_or(Disqualified::NoSeparator)?;
    let (space_part, rest) = chars.split_at(dot);
    let rest = &rest[1..];

    let (title_part, attachment) = match find_unescaped(rest, '@') {
        // An `@` opening the title is a pseudo-title such as `@home`, not an
        // attachment separator.
        Some(0) | None => (rest, None),
        Some(at) => {
            let file = &rest[at + 1..];
            if file.is_empty() {
                return Err(Disqualified::EmptyAttachment);
            }
            (&rest[..at], Some(collect(file)))
        }
    };

    if find_unescaped(title_part, '.').is_some() {
        return Err(Disqualified::DottedTitle);
    }

    let space = collect(space_part);
    let title = collect(title_part);
    if space.is_empty() || title.is_empty() {
        return Err(Disqualified::EmptySegment);
    }
    if title == HOME_TITLE {
        return Err(Disqualified::HomePageTitle);
    }

    Ok(BrokenLink {
        space,
        title,
        attachment,
    })
}
