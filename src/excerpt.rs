use std::sync::LazyLock;

use regex::Regex;

use crate::front_matter::split_front_matter;

const WORDS_PER_MINUTE: usize = 200;
const ELLIPSIS: char = '…';

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\r?\n").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").unwrap());
static BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BOLD_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").unwrap());
static ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static ITALIC_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b_([^_\n]+)_\b").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]*)`").unwrap());
static NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*\r?\n[ \t]*").unwrap());

pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

/// Minutes to read `content` at 200 words per minute, rounded up.
pub fn reading_time(content: &str) -> usize {
    word_count(content).div_ceil(WORDS_PER_MINUTE)
}

/// Plain-text summary taken from the first paragraph of `content`.
///
/// Markdown markers are stripped in a fixed order: headings, bold, italic,
/// links (kept as their text), inline code. Line breaks inside the paragraph
/// collapse to single spaces.
pub fn derive_excerpt(content: &str) -> String {
    let body = split_front_matter(content).map_or(content, |(_, body)| body);

    let Some(paragraph) = PARAGRAPH_BREAK
        .split(body)
        .map(str::trim)
        .find(|p| !p.is_empty())
    else {
        return String::new();
    };

    let text = HEADING.replace_all(paragraph, "");
    let text = BOLD_STAR.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = NEWLINES.replace_all(&text, " ");

    text.trim().to_string()
}

/// Shorten an excerpt for listings, appending an ellipsis when cut.
pub fn truncate_excerpt(excerpt: &str, max_chars: usize) -> String {
    match excerpt.char_indices().nth(max_chars) {
        None => excerpt.to_string(),
        Some((cut, _)) => {
            let mut short = excerpt[..cut].trim_end().to_string();
            short.push(ELLIPSIS);
            short
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_time(""), 0);
        assert_eq!(reading_time("Hello world."), 1);
        assert_eq!(reading_time(&"word ".repeat(200)), 1);
        assert_eq!(reading_time(&"word ".repeat(201)), 2);
        assert_eq!(reading_time(&"word\n".repeat(1000)), 5);
    }

    #[test]
    fn excerpt_is_first_paragraph() {
        let content = "Hello world.\n\nSecond paragraph.";
        assert_eq!(derive_excerpt(content), "Hello world.");
    }

    #[test]
    fn excerpt_strips_inline_markers() {
        let content = "## A **bold** and *italic* [link](https://example.com)\nwith `code` and __more__ _emphasis_.\n\nNext.";
        assert_eq!(
            derive_excerpt(content),
            "A bold and italic link with code and more emphasis."
        );
    }

    #[test]
    fn excerpt_keeps_snake_case_words() {
        assert_eq!(derive_excerpt("call some_fn_name now"), "call some_fn_name now");
    }

    #[test]
    fn excerpt_skips_leading_blank_lines_and_front_matter() {
        let content = "---\ntitle: x\n---\n\n\n  \nFirst real\nparagraph.\n\nLater.";
        assert_eq!(derive_excerpt(content), "First real paragraph.");
    }

    #[test]
    fn excerpt_of_empty_content_is_empty() {
        assert_eq!(derive_excerpt(""), "");
        assert_eq!(derive_excerpt("\n\n   \n"), "");
    }

    #[test]
    fn excerpt_is_idempotent() {
        let content = "Some *styled* text with a [ref](/x).\n\nMore.";
        assert_eq!(derive_excerpt(content), derive_excerpt(content));
    }

    #[test]
    fn truncation_appends_ellipsis() {
        assert_eq!(truncate_excerpt("short", 150), "short");
        let long = "a".repeat(151);
        let short = truncate_excerpt(&long, 150);
        assert_eq!(short.chars().count(), 151);
        assert!(short.ends_with('…'));
        assert_eq!(truncate_excerpt("héllo wörld", 6), "héllo…");
    }
}
