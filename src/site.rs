use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use htmlescape::{encode_attribute, encode_minimal};
use regex::{Captures, Regex};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{HydrateMode, SiteConfig};
use crate::content::{paginate, parse_date, ContentSource, FsSource, PostRepository};
use crate::diagram::{DiagramRenderer, CLIENT_SCRIPT};
use crate::error::{BlogError, Result};
use crate::excerpt::truncate_excerpt;
use crate::markdown::{highlight_css, render_markdown_to_html};
use crate::models::{PageListing, Post};

pub const HOT_RELOAD_SCRIPT: &str = r#"
<script>
    const socket = new WebSocket("ws://" + window.location.host + "/ws");
    socket.onmessage = (event) => {
        if (event.data === "reload") {
            window.location.reload();
        }
    };
</script>
"#;

const DEFAULT_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{ title }}</title>
<link rel="stylesheet" href="/static/style.css">
<link rel="stylesheet" href="/static/highlight.css">
</head>
<body>
<header>{{ banner }}</header>
<main>{{ content }}</main>
<aside><h2>Posts</h2><ul>{{ posts }}</ul></aside>
</body>
</html>
"#;

const DEFAULT_BANNER: &str = r#"<nav><a href="/">Home</a> <a href="/about/">About</a></nav>"#;

const DEFAULT_NOT_FOUND: &str = r#"<h1>Not found</h1><p>There is nothing at this address{{slug}}.</p>"#;

static PLACEHOLDER_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// Fill `{{ key }}` placeholders in one pass; unknown keys are kept.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER_KEY
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}

fn inject_before_body_end(page: &mut String, snippet: &str) {
    match page.rfind("</body>") {
        Some(at) => page.insert_str(at, snippet),
        None => page.push_str(snippet),
    }
}

/// Layout pieces read from the content directory, with built-in fallbacks.
#[derive(Debug, Clone)]
pub struct Templates {
    pub layout: String,
    pub banner: String,
    pub not_found: String,
}

impl Templates {
    pub fn load(content_dir: &Path) -> Result<Self> {
        Ok(Self {
            layout: read_optional(&content_dir.join("layout.html"))?.unwrap_or_else(|| DEFAULT_LAYOUT.into()),
            banner: read_optional(&content_dir.join("banner.html"))?.unwrap_or_else(|| DEFAULT_BANNER.into()),
            not_found: read_optional(&content_dir.join("not_found.html"))?
                .unwrap_or_else(|| DEFAULT_NOT_FOUND.into()),
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BlogError::io(path, e)),
    }
}

fn write_page(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BlogError::io(parent, e))?;
    }
    fs::write(path, html).map_err(|e| BlogError::io(path, e))
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BlogError::io(path, e)),
    }
}

fn page_url(page: usize) -> String {
    if page <= 1 {
        "/".to_string()
    } else {
        format!("/page/{page}/")
    }
}

fn page_file(page: usize) -> PathBuf {
    if page <= 1 {
        PathBuf::from("index.html")
    } else {
        PathBuf::from("page").join(page.to_string()).join("index.html")
    }
}

fn post_url(post: &Post) -> String {
    format!("/posts/{}/", encode_attribute(&post.slug))
}

fn format_date(date: &str) -> String {
    parse_date(date)
        .map(|d: NaiveDate| d.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|| date.to_string())
}

fn post_meta(post: &Post) -> String {
    let mut parts = Vec::new();
    if let Some(date) = post.date.as_deref() {
        let datetime = parse_date(date).map(|d| d.to_string()).unwrap_or_default();
        parts.push(format!(
            "<time datetime=\"{}\">{}</time>",
            encode_attribute(&datetime),
            encode_minimal(&format_date(date))
        ));
    }
    if post.reading_time > 0 {
        parts.push(format!("{} min read", post.reading_time));
    }
    format!("<p class=\"post-meta\">{}</p>", parts.join(" · "))
}

/// Totals logged after a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub posts: usize,
    pub pages: usize,
    pub diagrams: usize,
    pub failed_diagrams: usize,
}

/// Build the site described by `config` from its content directory.
pub fn build_site(config: &SiteConfig) -> Result<BuildReport> {
    let posts = PostRepository::new(FsSource::new(config.posts_dir()));
    let pages = PostRepository::new(FsSource::new(&config.content_dir));
    let report = SiteBuilder::new(config)?.build(&posts, &pages)?;
    info!(
        posts = report.posts,
        pages = report.pages,
        diagrams = report.diagrams,
        failed_diagrams = report.failed_diagrams,
        "Site built into {}",
        config.output_dir.display()
    );
    Ok(report)
}

pub struct SiteBuilder<'a> {
    config: &'a SiteConfig,
    templates: Templates,
    renderer: DiagramRenderer,
    report: BuildReport,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(config: &'a SiteConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            templates: Templates::load(&config.content_dir)?,
            renderer: DiagramRenderer::new(),
            report: BuildReport::default(),
        })
    }

    /// Write every page. `pages` holds standalone pages such as `about.md`.
    pub fn build<P, S>(mut self, posts: &PostRepository<P>, pages: &PostRepository<S>) -> Result<BuildReport>
    where
        P: ContentSource,
        S: ContentSource,
    {
        let output = self.config.output_dir.clone();
        fs::create_dir_all(&output).map_err(|e| BlogError::io(&output, e))?;
        remove_dir_if_exists(&output.join("posts"))?;
        remove_dir_if_exists(&output.join("page"))?;

        let posts = posts.list_all()?;
        let sidebar = self.sidebar(&posts);
        let page_size = self.config.posts_per_page;

        let listing_pages = posts.len().div_ceil(page_size).max(1);
        for page in 1..=listing_pages {
            let listing = paginate(&posts, page, page_size)?;
            let html = self.listing_page(&listing, &sidebar);
            write_page(&output.join(page_file(page)), &html)?;
            self.report.pages += 1;
        }

        for post in &posts {
            let html = self.post_page(post, &sidebar);
            write_page(&output.join("posts").join(&post.slug).join("index.html"), &html)?;
            self.report.posts += 1;
        }

        if let Some(about) = pages.get_by_slug("about")? {
            let html = self.standalone_page(&about, "About", &sidebar);
            write_page(&output.join("about").join("index.html"), &html)?;
            self.report.pages += 1;
        } else {
            debug!("No about.md, skipping about page");
        }

        let not_found = fill_template(&self.templates.not_found, &[("slug", "")]);
        let html = self.layout("Not found", &not_found, &sidebar);
        write_page(&output.join("404.html"), &html)?;

        self.copy_static(&output)?;
        if let Some(css) = highlight_css() {
            write_page(&output.join("static").join("highlight.css"), &css)?;
        }
        Ok(self.report)
    }

    fn sidebar(&self, posts: &[Post]) -> String {
        let mut list_items = String::new();
        for post in posts {
            list_items.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>",
                post_url(post),
                encode_minimal(post.display_title())
            ));
        }
        list_items
    }

    fn layout(&self, title: &str, content: &str, sidebar: &str) -> String {
        let title = if title == self.config.title {
            encode_minimal(title)
        } else {
            encode_minimal(&format!("{} · {}", title, self.config.title))
        };
        let mut page = fill_template(
            &self.templates.layout,
            &[
                ("title", title.as_str()),
                ("banner", self.templates.banner.as_str()),
                ("content", content),
                ("posts", sidebar),
            ],
        );

        if self.config.diagrams.hydrate == HydrateMode::Client && content.contains("data-diagram=") {
            inject_before_body_end(&mut page, CLIENT_SCRIPT);
        }
        if self.config.is_development {
            inject_before_body_end(&mut page, HOT_RELOAD_SCRIPT);
        }
        page
    }

    /// Markdown to HTML, hydrating diagrams when they are rendered at build time.
    fn render_body(&mut self, markdown: &str) -> String {
        let html = render_markdown_to_html(markdown, &self.config.diagrams.language);
        match self.config.diagrams.hydrate {
            HydrateMode::Client => html,
            HydrateMode::Build => {
                let hydrated = self.renderer.hydrate(&html);
                self.report.diagrams += hydrated.rendered;
                self.report.failed_diagrams += hydrated.failed;
                hydrated.html
            }
        }
    }

    fn listing_page(&self, listing: &PageListing, sidebar: &str) -> String {
        let mut body = String::new();
        if listing.posts.is_empty() {
            body.push_str("<p class=\"empty\">No posts yet.</p>");
        }
        for post in &listing.posts {
            body.push_str(&format!(
                "<article class=\"post-summary\"><h2><a href=\"{}\">{}</a></h2>{}<p class=\"excerpt\">{}</p></article>",
                post_url(post),
                encode_minimal(post.display_title()),
                post_meta(post),
                encode_minimal(&truncate_excerpt(&post.excerpt, self.config.excerpt_length))
            ));
        }

        if listing.has_prev_page || listing.has_next_page {
            body.push_str("<nav class=\"pagination\">");
            if listing.has_prev_page {
                body.push_str(&format!(
                    "<a rel=\"prev\" href=\"{}\">Newer posts</a>",
                    page_url(listing.current_page - 1)
                ));
            }
            body.push_str(&format!(
                "<span>Page {} of {}</span>",
                listing.current_page, listing.total_pages
            ));
            if listing.has_next_page {
                body.push_str(&format!(
                    "<a rel=\"next\" href=\"{}\">Older posts</a>",
                    page_url(listing.current_page + 1)
                ));
            }
            body.push_str("</nav>");
        }

        let title = if listing.current_page <= 1 {
            self.config.title.clone()
        } else {
            format!("Page {}", listing.current_page)
        };
        self.layout(&title, &body, sidebar)
    }

    fn post_page(&mut self, post: &Post, sidebar: &str) -> String {
        let rendered = self.render_body(&post.content);
        let body = format!(
            "<article class=\"post\"><h1>{}</h1>{}{}</article>",
            encode_minimal(post.display_title()),
            post_meta(post),
            rendered
        );
        self.layout(post.display_title(), &body, sidebar)
    }

    fn standalone_page(&mut self, page: &Post, fallback_title: &str, sidebar: &str) -> String {
        let title = page.title.as_deref().unwrap_or(fallback_title);
        let rendered = self.render_body(&page.content);
        let body = format!(
            "<article class=\"page\"><h1>{}</h1>{}</article>",
            encode_minimal(title),
            rendered
        );
        self.layout(title, &body, sidebar)
    }

    fn copy_static(&self, output: &Path) -> Result<()> {
        let source = self.config.static_dir();
        if !source.is_dir() {
            return Ok(());
        }
        let target = output.join("static");
        for entry in WalkDir::new(&source) {
            let entry = entry.map_err(|e| BlogError::io(&source, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let destination = target.join(relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|e| BlogError::io(parent, e))?;
            }
            fs::copy(entry.path(), &destination).map_err(|e| BlogError::io(entry.path(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    struct Fixture {
        _dir: tempfile::TempDir,
        config: SiteConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = SiteConfig {
                title: "Test Blog".into(),
                content_dir: dir.path().join("content"),
                output_dir: dir.path().join("public"),
                ..SiteConfig::default()
            };
            fs::create_dir_all(config.posts_dir()).unwrap();
            Self { _dir: dir, config }
        }

        fn post(&self, slug: &str, date: &str, body: &str) -> &Self {
            let text = format!("---\ntitle: Post {slug}\ndate: {date}\n---\n{body}\n");
            fs::write(self.config.posts_dir().join(format!("{slug}.md")), text).unwrap();
            self
        }

        fn file(&self, relative: &str, text: &str) -> &Self {
            let path = self.config.content_dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
            self
        }

        fn build(&self) -> BuildReport {
            build_site(&self.config).unwrap()
        }

        fn output(&self, relative: &str) -> String {
            fs::read_to_string(self.config.output_dir.join(relative)).unwrap()
        }
    }

    fn select_count(html: &str, selector: &str) -> usize {
        let document = Html::parse_document(html);
        let selector = Selector::parse(selector).unwrap();
        document.select(&selector).count()
    }

    fn link_href(html: &str, selector: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(selector).unwrap();
        document
            .select(&selector)
            .next()
            .and_then(|a| a.value().attr("href").map(str::to_string))
    }

    #[test]
    fn paginates_listing_pages() {
        let fixture = Fixture::new();
        for day in 1..=7 {
            fixture.post(&format!("p{day}"), &format!("2024-02-0{day}"), "Body text.");
        }
        let report = fixture.build();
        assert_eq!(report.posts, 7);

        let first = fixture.output("index.html");
        assert_eq!(select_count(&first, "article.post-summary"), 5);
        assert_eq!(link_href(&first, "a[rel=next]").as_deref(), Some("/page/2/"));
        assert_eq!(link_href(&first, "a[rel=prev]"), None);
        assert_eq!(link_href(&first, "article.post-summary h2 a").as_deref(), Some("/posts/p7/"));

        let second = fixture.output("page/2/index.html");
        assert_eq!(select_count(&second, "article.post-summary"), 2);
        assert_eq!(link_href(&second, "a[rel=prev]").as_deref(), Some("/"));
        assert_eq!(link_href(&second, "a[rel=next]"), None);
        assert!(!fixture.config.output_dir.join("page/3").exists());
    }

    #[test]
    fn slugs_are_escaped_in_links() {
        let fixture = Fixture::new();
        fixture.post("say-\"hi\"<b>", "2024-02-01", "Body text.");
        fixture.build();

        let index = fixture.output("index.html");
        assert!(!index.contains("href=\"/posts/say-\"hi"));
        assert_eq!(select_count(&index, "article.post-summary h2 a"), 1);
        assert_eq!(select_count(&index, "article.post-summary b"), 0);
        assert_eq!(
            link_href(&index, "article.post-summary h2 a").as_deref(),
            Some("/posts/say-\"hi\"<b>/")
        );
    }

    #[test]
    fn empty_site_still_has_an_index() {
        let fixture = Fixture::new();
        let report = fixture.build();
        assert_eq!(report.posts, 0);
        assert!(fixture.output("index.html").contains("No posts yet."));
        assert!(fixture.output("404.html").contains("Not found"));
    }

    #[test]
    fn post_pages_render_and_hydrate_diagrams() {
        let fixture = Fixture::new();
        fixture.post("flow", "2024-03-03", "Look:\n\n```mermaid\ngraph LR\nA-->B\n```\n\n```mermaid\nnot valid -->\n```\n");
        let report = fixture.build();
        assert_eq!(report.diagrams, 1);
        assert_eq!(report.failed_diagrams, 1);

        let page = fixture.output("posts/flow/index.html");
        assert_eq!(select_count(&page, "article.post h1"), 1);
        assert_eq!(select_count(&page, "figure.diagram svg"), 1);
        assert_eq!(select_count(&page, "div.diagram-error"), 1);
        assert!(!page.contains("data-diagram="));
        assert!(!page.contains(CLIENT_SCRIPT));
    }

    #[test]
    fn client_mode_keeps_placeholders_and_injects_script() {
        let mut fixture = Fixture::new();
        fixture.config.diagrams.hydrate = HydrateMode::Client;
        fixture.post("flow", "2024-03-03", "```mermaid\nA-->B\n```\n");
        fixture.post("plain", "2024-03-02", "No diagrams.");
        fixture.build();

        let page = fixture.output("posts/flow/index.html");
        assert_eq!(select_count(&page, "div.diagram[data-diagram]"), 1);
        assert!(page.contains(CLIENT_SCRIPT));
        assert!(!fixture.output("posts/plain/index.html").contains(CLIENT_SCRIPT));
    }

    #[test]
    fn uses_content_templates_and_about_page() {
        let fixture = Fixture::new();
        fixture
            .file("layout.html", "<html><body><div id=\"custom\">{{ banner }}|{{ content }}</div><ul>{{ posts }}</ul></body></html>")
            .file("banner.html", "<span class=\"brand\">Banner</span>")
            .file("about.md", "---\ntitle: About me\n---\nI write about {{ posts }} literally.\n")
            .post("one", "2024-01-01", "Hi.");
        let report = fixture.build();
        assert_eq!(report.pages, 2);

        let about = fixture.output("about/index.html");
        assert_eq!(select_count(&about, "#custom span.brand"), 1);
        assert!(about.contains("About me"));
        assert!(about.contains("{{ posts }} literally"));
        assert_eq!(link_href(&about, "ul li a").as_deref(), Some("/posts/one/"));
    }

    #[test]
    fn excerpts_are_truncated_in_listings() {
        let mut fixture = Fixture::new();
        fixture.config.excerpt_length = 10;
        fixture.post("long", "2024-01-01", "A fairly long opening paragraph.");
        fixture.build();
        assert!(fixture.output("index.html").contains("<p class=\"excerpt\">A fairly l…</p>"));
    }

    #[test]
    fn rebuild_removes_deleted_posts_and_copies_static() {
        let fixture = Fixture::new();
        fixture.post("gone", "2024-01-01", "Soon deleted.").file("static/css/site.css", "body {}");
        fixture.build();
        assert!(fixture.config.output_dir.join("posts/gone/index.html").exists());
        assert_eq!(fixture.output("static/css/site.css"), "body {}");
        assert!(!fixture.output("static/highlight.css").is_empty());

        fs::remove_file(fixture.config.posts_dir().join("gone.md")).unwrap();
        fixture.build();
        assert!(!fixture.config.output_dir.join("posts/gone").exists());
    }

    #[test]
    fn development_build_injects_hot_reload() {
        let mut fixture = Fixture::new();
        fixture.config.is_development = true;
        fixture.build();
        let index = fixture.output("index.html");
        assert!(index.contains("new WebSocket"));
        assert!(index.find("new WebSocket") < index.find("</body>"));
    }

    #[test]
    fn template_fill_is_single_pass() {
        let filled = fill_template("{{ a }}-{{b}}-{{ c }}", &[("a", "{{ b }}"), ("b", "x")]);
        assert_eq!(filled, "{{ b }}-x-{{ c }}");
    }
}
