use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate};
use tracing::{debug, warn};

use crate::error::{BlogError, Result};
use crate::excerpt::{derive_excerpt, reading_time};
use crate::front_matter;
use crate::models::{PageListing, Post};

const EXTENSION: &str = ".md";

/// Read-only access to a flat collection of content files.
pub trait ContentSource {
    /// File names in the collection, e.g. `hello-world.md`.
    fn entries(&self) -> Result<Vec<String>>;

    /// Contents of one file, or `None` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<String>>;
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct FsSource {
    dir: PathBuf,
}

impl FsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ContentSource for FsSource {
    fn entries(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| BlogError::io(&self.dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BlogError::io(&self.dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!("Skipping non UTF-8 file name {:?}", name),
            }
        }
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlogError::io(path, e)),
        }
    }
}

/// In-memory collection for tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
impl MemorySource {
    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.files.insert(name.to_string(), text.to_string());
        self
    }
}

#[cfg(test)]
impl ContentSource for MemorySource {
    fn entries(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.files.get(name).cloned())
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(date).ok().map(|dt| dt.date_naive()))
}

/// Build a post from the raw text of `<slug>.md`.
pub fn parse_post(slug: &str, raw: &str) -> Post {
    let document = front_matter::parse(raw);
    let meta = document.front_matter;

    if let Some(declared) = meta.slug.as_deref().filter(|s| *s != slug) {
        debug!("Front matter slug {:?} ignored for {}{}", declared, slug, EXTENSION);
    }
    if let Some(date) = meta.date.as_deref().filter(|d| parse_date(d).is_none()) {
        warn!("Unrecognized date {:?} in {}{}", date, slug, EXTENSION);
    }

    let excerpt = meta
        .excerpt
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| derive_excerpt(&document.body));

    Post {
        slug: slug.to_string(),
        title: meta.title.filter(|t| !t.trim().is_empty()),
        date: meta.date,
        excerpt,
        reading_time: reading_time(&document.body),
        content: document.body,
    }
}

/// Newest first. Undated posts go last; equal dates order by slug.
pub fn sort_posts(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        let date_a = a.date.as_deref().and_then(parse_date);
        let date_b = b.date.as_deref().and_then(parse_date);
        date_b.cmp(&date_a).then_with(|| a.slug.cmp(&b.slug))
    });
}

/// Slice one 1-indexed page out of an already sorted post list.
///
/// Pages past the end, and page 0, come back with no posts.
pub fn paginate(posts: &[Post], page_number: usize, page_size: usize) -> Result<PageListing> {
    if page_size == 0 {
        return Err(BlogError::InvalidPageSize);
    }

    let total_posts = posts.len();
    let page_posts = match page_number.checked_sub(1) {
        Some(index) => posts
            .iter()
            .skip(index.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    Ok(PageListing {
        posts: page_posts,
        total_posts,
        total_pages: total_posts.div_ceil(page_size),
        current_page: page_number,
        has_next_page: page_number.saturating_mul(page_size) < total_posts,
        has_prev_page: page_number > 1,
    })
}

fn is_plain_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('.')
        && !slug.contains(['/', '\\'])
        && !slug.contains("..")
}

/// Posts stored as `<slug>.md` files in a [`ContentSource`]. Every call reads
/// the source again.
pub struct PostRepository<S> {
    source: S,
}

impl<S: ContentSource> PostRepository<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Every post, newest first.
    pub fn list_all(&self) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        for name in self.source.entries()? {
            let Some(slug) = name.strip_suffix(EXTENSION) else {
                continue;
            };
            if !is_plain_slug(slug) {
                continue;
            }
            if let Some(raw) = self.source.read(&name)? {
                posts.push(parse_post(slug, &raw));
            }
        }
        sort_posts(&mut posts);
        Ok(posts)
    }

    pub fn get_page(&self, page_number: usize, page_size: usize) -> Result<PageListing> {
        paginate(&self.list_all()?, page_number, page_size)
    }

    /// The post stored as `<slug>.md`, or `None` if there is none.
    pub fn get_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        if !is_plain_slug(slug) {
            return Ok(None);
        }
        let raw = self.source.read(&format!("{slug}{EXTENSION}"))?;
        Ok(raw.map(|raw| parse_post(slug, &raw)))
    }
}
