//! Leading-tag extraction for topic titles.
//!
//! A raw title may start with bracketed tags: `[Rust][Async] Pinning futures`.
//! Tags must be contiguous at the very start of the title; once free text
//! begins, brackets are ordinary title characters. A literal bracket inside
//! a tag is written doubled: `[[Tag]]` yields the tag `[Tag]`.

use std::sync::LazyLock;

use regex::Regex;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SLUG_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// Result of splitting a raw title into its tags and the remaining title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTitle {
    pub tags: Vec<String>,
    pub title: String,
}

/// Split leading bracketed tags off a raw title.
///
/// Tags come back in left-to-right order, trimmed; the title is trimmed.
/// Unbalanced brackets are not an error: the whole input comes back untouched
/// as the title with no tags. Emptiness and length are not checked here.
///
/// # Examples
///
/// ```
/// use forum_threads::tags::parse_title;
///
/// let parsed = parse_title("[Tag1][Tag2] Real Title");
/// assert_eq!(parsed.tags, vec!["Tag1", "Tag2"]);
/// assert_eq!(parsed.title, "Real Title");
/// ```
#[must_use]
pub fn parse_title(raw_title: &str) -> ParsedTitle {
    let mut depth: usize = 0;
    let mut in_tag_zone = true;
    let mut current_tag = String::new();
    let mut title = String::new();
    let mut tags = Vec::new();

    for ch in raw_title.chars() {
        if !in_tag_zone {
            title.push(ch);
            continue;
        }

        match ch {
            '[' if depth == 0 => depth += 1,
            ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let tag = current_tag.trim();
                    if !tag.is_empty() {
                        tags.push(tag.to_string());
                        current_tag.clear();
                    }
                } else if !current_tag.trim().is_empty() {
                    current_tag.push(ch);
                }
            }
            _ if depth > 0 => {
                current_tag.push(ch);
                if ch == '[' {
                    depth += 1;
                }
            }
            _ if ch.is_whitespace() => {}
            _ => {
                in_tag_zone = false;
                title.push(ch);
            }
        }
    }

    if depth != 0 {
        return ParsedTitle {
            tags: Vec::new(),
            title: raw_title.to_string(),
        };
    }

    ParsedTitle {
        tags,
        title: title.trim().to_string(),
    }
}

/// Rebuild the raw title a user would type: `[tag1][tag2] Title`.
#[must_use]
pub fn compose_title<S: AsRef<str>>(tags: &[S], title: &str) -> String {
    let prefix: String = tags
        .iter()
        .map(|tag| format!("[{}]", tag.as_ref()))
        .collect();
    format!("{prefix} {title}").trim().to_string()
}

/// Normalize a tag as stored: trimmed and lowercased.
#[must_use]
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// URL slug for topic and tag titles: lowercase words joined by dashes.
#[must_use]
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let cleaned = NON_SLUG_CHARS.replace_all(&lowered, "");
    let slug = SLUG_SEPARATORS.replace_all(cleaned.trim(), "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "sujet".to_string()
    } else {
        slug.to_string()
    }
}
