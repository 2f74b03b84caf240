//! A Markdown blog rendered to static pages.
//!
//! Posts live in `content/posts/*.md` with an optional YAML front matter
//! block. [`site::build_site`] turns the content directory into a tree of HTML
//! files: paginated listings, one page per post, an about page and a 404 page.

pub mod config;
pub mod content;
pub mod diagram;
pub mod error;
pub mod excerpt;
pub mod front_matter;
pub mod hot_reload;
pub mod markdown;
pub mod models;
pub mod site;

pub use error::{BlogError, Result};
