//! Site configuration, read from `blog.toml`.
//!
//! ```toml
//! title = "My Blog"
//! content_dir = "content"
//! output_dir = "public"
//! posts_per_page = 5
//! excerpt_length = 150
//!
//! [diagrams]
//! language = "mermaid"
//! hydrate = "build"   # or "client"
//! ```
//!
//! Every key is optional. The environment adds `RUST_ENV=development` (dev
//! loop) and `PORT` (preview server port); `BLOG_CONFIG` points at another
//! config file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BlogError, Result};

const DEFAULT_CONFIG_PATH: &str = "blog.toml";
const DEFAULT_PORT: u16 = 8080;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HydrateMode {
    /// Diagrams become inline SVG when the site is built.
    #[default]
    Build,
    /// Placeholders ship as-is and a script renders them in the browser.
    Client,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DiagramConfig {
    /// Info string that marks a fenced block as a diagram.
    pub language: String,
    pub hydrate: HydrateMode,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            language: "mermaid".to_string(),
            hydrate: HydrateMode::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub title: String,
    pub content_dir: PathBuf,
    pub output_dir: PathBuf,
    pub posts_per_page: usize,
    /// Listing excerpts longer than this many characters are cut.
    pub excerpt_length: usize,
    pub diagrams: DiagramConfig,
    #[serde(skip)]
    pub is_development: bool,
    #[serde(skip)]
    pub port: u16,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Blog".to_string(),
            content_dir: PathBuf::from("content"),
            output_dir: PathBuf::from("public"),
            posts_per_page: 5,
            excerpt_length: 150,
            diagrams: DiagramConfig::default(),
            is_development: false,
            port: DEFAULT_PORT,
        }
    }
}

impl SiteConfig {
    /// Load from `BLOG_CONFIG` (or `blog.toml`) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("BLOG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_path(Path::new(&path))?;

        config.is_development = std::env::var("RUST_ENV")
            .map(|v| v == "development")
            .unwrap_or(false);
        config.port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Ok(config)
    }

    /// A missing file means all defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(BlogError::io(path, e)),
        };
        let config: Self = toml::from_str(&text).map_err(|source| BlogError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.posts_per_page == 0 {
            return Err(BlogError::InvalidConfig(
                "posts_per_page must be greater than zero".into(),
            ));
        }
        let language = self.diagrams.language.trim();
        if language.is_empty() || language.contains(char::is_whitespace) {
            return Err(BlogError::InvalidConfig(
                "diagrams.language must be a single word".into(),
            ));
        }
        Ok(())
    }

    pub fn posts_dir(&self) -> PathBuf {
        self.content_dir.join("posts")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.content_dir.join("static")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blog.toml");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SiteConfig::from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SiteConfig::default());
        assert_eq!(config.posts_per_page, 5);
        assert_eq!(config.diagrams.language, "mermaid");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config("title = \"Notes\"\nposts_per_page = 3\n\n[diagrams]\nhydrate = \"client\"\n");
        let config = SiteConfig::from_path(&path).unwrap();
        assert_eq!(config.title, "Notes");
        assert_eq!(config.posts_per_page, 3);
        assert_eq!(config.diagrams.hydrate, HydrateMode::Client);
        assert_eq!(config.diagrams.language, "mermaid");
        assert_eq!(config.output_dir, PathBuf::from("public"));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let (_dir, path) = write_config("posts_per_page = 0\n");
        assert!(matches!(SiteConfig::from_path(&path), Err(BlogError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_values_fail_to_parse() {
        let (_dir, path) = write_config("[diagrams]\nhydrate = \"lazy\"\n");
        assert!(matches!(SiteConfig::from_path(&path), Err(BlogError::ConfigParse { .. })));

        let (_dir, path) = write_config("colour = \"blue\"\n");
        assert!(matches!(SiteConfig::from_path(&path), Err(BlogError::ConfigParse { .. })));
    }
}
