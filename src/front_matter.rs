use gray_matter::{engine::YAML, Matter};
use tracing::warn;

use crate::models::FrontMatter;

const DELIMITER: &str = "---";

/// A content file split into its metadata and Markdown body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub front_matter: FrontMatter,
    pub body: String,
}

/// Split raw file text into front matter and body.
///
/// Missing or malformed metadata yields `FrontMatter::default()`; this never fails.
pub fn parse(raw: &str) -> ParsedDocument {
    if split_front_matter(raw).is_none() {
        return ParsedDocument {
            front_matter: FrontMatter::default(),
            body: raw.to_string(),
        };
    }

    let matter = Matter::<YAML>::new();
    match matter.parse::<FrontMatter>(raw) {
        Ok(parsed) => ParsedDocument {
            front_matter: parsed.data.unwrap_or_default(),
            body: parsed.content,
        },
        Err(e) => {
            warn!("Failed to parse front matter: {}", e);
            let body = split_front_matter(raw).map_or(raw, |(_, body)| body);
            ParsedDocument {
                front_matter: FrontMatter::default(),
                body: body.to_string(),
            }
        }
    }
}

/// Locate a leading `---` delimited block.
///
/// Returns `(block, body)` where `block` excludes both delimiter lines, or
/// `None` when the text does not open with a closed block.
pub fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let first_break = raw.find('\n')?;
    if raw[..first_break].trim_end() != DELIMITER {
        return None;
    }

    let block_start = first_break + 1;
    let mut offset = block_start;
    for line in raw[block_start..].split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let block = &raw[block_start..offset];
            let body = &raw[offset + line.len()..];
            return Some((block, body));
        }
        offset += line.len();
    }
    None
}
