//! Diagram placeholders and their hydration.
//!
//! Rendering happens in two phases. While Markdown is converted, each fenced
//! diagram block is swapped for an inert placeholder element:
//!
//! ```html
//! <div class="diagram" data-diagram-version="1" data-diagram="QS0tPkI="></div>
//! ```
//!
//! `data-diagram` holds the standard-alphabet base64 of the definition text and
//! `data-diagram-version` versions this marker format. Hydration later finds the
//! placeholders and mounts a rendered SVG (or an inline error) in their place,
//! either at build time through [`DiagramRenderer::hydrate`] or in the browser
//! through [`CLIENT_SCRIPT`].

pub mod flowchart;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::warn;

pub const MARKER_VERSION: u32 = 1;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div class="diagram" data-diagram-version="(\d+)" data-diagram="([A-Za-z0-9+/=]*)"></div>"#)
        .unwrap()
});

/// Browser-side hydration for pages built with client mode.
pub const CLIENT_SCRIPT: &str = r#"
<script type="module">
    import mermaid from "https://cdn.jsdelivr.net/npm/mermaid@11/dist/mermaid.esm.min.mjs";
    mermaid.initialize({ startOnLoad: false });
    const decode = (payload) =>
        new TextDecoder().decode(Uint8Array.from(atob(payload), (c) => c.charCodeAt(0)));
    document.querySelectorAll('div.diagram[data-diagram-version="1"]').forEach(async (el) => {
        const id = "diagram-" + crypto.randomUUID();
        try {
            const { svg } = await mermaid.render(id, decode(el.dataset.diagram));
            el.innerHTML = svg;
        } catch (err) {
            el.className = "diagram-error";
            el.textContent = "Diagram error: " + err.message;
        }
    });
</script>
"#;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagramError {
    #[error("invalid diagram payload: {0}")]
    Payload(String),
    #[error("unsupported diagram marker version {0}")]
    MarkerVersion(String),
    #[error("unsupported diagram type `{0}`")]
    UnsupportedKind(String),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("diagram is empty")]
    Empty,
}

pub fn encode_payload(source: &str) -> String {
    STANDARD.encode(source.as_bytes())
}

pub fn decode_payload(payload: &str) -> Result<String, DiagramError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| DiagramError::Payload(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DiagramError::Payload(e.to_string()))
}

/// Placeholder element carrying `source` for later hydration.
pub fn placeholder_html(source: &str) -> String {
    format!(
        "<div class=\"diagram\" data-diagram-version=\"{MARKER_VERSION}\" data-diagram=\"{}\"></div>",
        encode_payload(source)
    )
}

/// Decoded payloads of every placeholder in `html`, in document order.
pub fn find_placeholders(html: &str) -> Vec<Result<String, DiagramError>> {
    PLACEHOLDER
        .captures_iter(html)
        .map(|caps| decode_marker(&caps[1], &caps[2]))
        .collect()
}

fn decode_marker(version: &str, payload: &str) -> Result<String, DiagramError> {
    if version.parse::<u32>().ok() != Some(MARKER_VERSION) {
        return Err(DiagramError::MarkerVersion(version.to_string()));
    }
    decode_payload(payload)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hydrated {
    pub html: String,
    pub rendered: usize,
    pub failed: usize,
}

/// Build-time diagram renderer. Every render gets a fresh id.
#[derive(Debug, Default)]
pub struct DiagramRenderer {
    next_id: AtomicU64,
}

impl DiagramRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> String {
        format!("diagram-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Render one definition to a `<figure>` wrapping an inline SVG.
    pub fn render(&self, source: &str) -> Result<String, DiagramError> {
        let chart = flowchart::parse(source)?;
        let id = self.fresh_id();
        let svg = flowchart::render_svg(&chart, &id);
        Ok(format!("<figure class=\"diagram\" id=\"{id}\">{svg}</figure>"))
    }

    /// Replace every placeholder in `html`. A failing diagram becomes an
    /// inline error element and the rest of the page is unaffected.
    pub fn hydrate(&self, html: &str) -> Hydrated {
        let mut rendered = 0;
        let mut failed = 0;
        let html = PLACEHOLDER
            .replace_all(html, |caps: &Captures| {
                match decode_marker(&caps[1], &caps[2]).and_then(|source| self.render(&source)) {
                    Ok(figure) => {
                        rendered += 1;
                        figure
                    }
                    Err(e) => {
                        warn!("Failed to render diagram: {}", e);
                        failed += 1;
                        error_html(&e)
                    }
                }
            })
            .into_owned();

        Hydrated {
            html,
            rendered,
            failed,
        }
    }
}

fn error_html(error: &DiagramError) -> String {
    format!(
        "<div class=\"diagram-error\" role=\"alert\">Diagram error: {}</div>",
        htmlescape::encode_minimal(&error.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_byte_for_byte() {
        for source in ["A-->B", "graph LR\n  A[\"é ü\"] --> B\n", "", "  trailing  \r\n"] {
            assert_eq!(decode_payload(&encode_payload(source)).unwrap(), source);
        }
    }

    #[test]
    fn placeholder_is_found_and_decoded() {
        let html = format!("<p>before</p>\n{}\n<p>after</p>", placeholder_html("A-->B"));
        assert_eq!(find_placeholders(&html), vec![Ok("A-->B".to_string())]);
    }

    #[test]
    fn bad_payload_is_rejected() {
        assert!(matches!(decode_payload("@@@"), Err(DiagramError::Payload(_))));
        // "/w==" decodes to 0xFF, which is not UTF-8.
        assert!(matches!(decode_payload("/w=="), Err(DiagramError::Payload(_))));
    }

    #[test]
    fn hydrate_isolates_failures() {
        let html = format!(
            "{}\n<p>text</p>\n{}\n{}",
            placeholder_html("A-->B"),
            placeholder_html("pie\n  \"a\": 1"),
            placeholder_html("B-->C"),
        );
        let hydrated = DiagramRenderer::new().hydrate(&html);

        assert_eq!(hydrated.rendered, 2);
        assert_eq!(hydrated.failed, 1);
        assert!(hydrated.html.contains("<p>text</p>"));
        assert!(hydrated.html.contains("class=\"diagram-error\""));
        assert!(hydrated.html.contains("unsupported diagram type `pie`"));
        assert!(!hydrated.html.contains("data-diagram="));
    }

    #[test]
    fn every_render_gets_a_unique_id() {
        let renderer = DiagramRenderer::new();
        let first = renderer.render("A-->B").unwrap();
        let second = renderer.render("A-->B").unwrap();
        assert!(first.contains("id=\"diagram-1\""));
        assert!(second.contains("id=\"diagram-2\""));
    }

    #[test]
    fn unknown_marker_version_is_an_error() {
        let html = "<div class=\"diagram\" data-diagram-version=\"2\" data-diagram=\"QS0tPkI=\"></div>";
        let hydrated = DiagramRenderer::new().hydrate(html);
        assert_eq!(hydrated.failed, 1);
        assert!(hydrated.html.contains("marker version 2"));
    }

    #[test]
    fn error_text_is_escaped() {
        let html = placeholder_html("A --> <script>");
        let hydrated = DiagramRenderer::new().hydrate(&html);
        assert_eq!(hydrated.failed, 1);
        assert!(!hydrated.html.contains("<script>"));
    }
}
