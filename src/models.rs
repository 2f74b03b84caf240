use serde::Deserialize;

/// Metadata block at the top of a content file.
///
/// Every field is optional; unknown keys are ignored.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub date: Option<String>,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// File name stem of the backing content file.
    pub slug: String,
    pub title: Option<String>,
    pub date: Option<String>,
    pub excerpt: String,
    /// Raw Markdown body, front matter removed.
    pub content: String,
    /// Estimated minutes to read.
    pub reading_time: usize,
}

impl Post {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.slug)
    }
}

/// One page of the reverse-chronological post listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListing {
    pub posts: Vec<Post>,
    pub total_posts: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}
