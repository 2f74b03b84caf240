use std::sync::LazyLock;

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use syntect::{
    highlighting::ThemeSet,
    html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};
use tracing::warn;

use crate::diagram::placeholder_html;

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);

const HIGHLIGHT_THEME: &str = "InspiredGitHub";

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_MATH);
    options
}

/// Render a Markdown body to an HTML fragment.
///
/// Fenced blocks tagged `diagram_language` become diagram placeholders, code
/// blocks are highlighted with class-annotated spans, and math is typeset
/// with KaTeX. Raw HTML passes through untouched.
pub fn render_markdown_to_html(markdown: &str, diagram_language: &str) -> String {
    let prepared = prepare(markdown, diagram_language);

    let mut code_block: Option<(Option<String>, String)> = None;
    let mut events = Vec::new();
    for event in Parser::new_ext(&prepared, markdown_options()) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let info = match kind {
                    CodeBlockKind::Fenced(info) if !info.trim().is_empty() => Some(info.to_string()),
                    _ => None,
                };
                code_block = Some((info, String::new()));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((info, code)) = code_block.take() {
                    events.push(Event::Html(highlight_code_block(&code, info.as_deref()).into()));
                }
            }
            Event::Text(text) if code_block.is_some() => {
                if let Some((_, code)) = code_block.as_mut() {
                    code.push_str(&text);
                }
            }
            Event::InlineMath(math) => {
                events.push(Event::Html(CowStr::Boxed(render_math_html(&math, false).into_boxed_str())))
            }
            Event::DisplayMath(math) => {
                events.push(Event::Html(CowStr::Boxed(render_math_html(&math, true).into_boxed_str())))
            }
            other => events.push(other),
        }
    }

    let mut html_out = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut html_out, events.into_iter());
    html_out
}

#[derive(Debug, Clone, Copy)]
struct Fence {
    marker: char,
    len: usize,
}

fn fence_indent(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent <= 3).then_some(indent)
}

/// Opening code fence and its info string.
fn opening_fence(line: &str) -> Option<(Fence, &str)> {
    let rest = &line[fence_indent(line)?..];
    let marker = rest.chars().next().filter(|&c| c == '`' || c == '~')?;
    let len = rest.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { marker, len }, info))
}

/// Drop up to `indent` leading spaces, as CommonMark does for fence content.
fn strip_indent(line: &str, indent: usize) -> &str {
    let leading = line.len() - line.trim_start_matches(' ').len();
    &line[leading.min(indent)..]
}

fn closes(fence: Fence, line: &str) -> bool {
    let Some(indent) = fence_indent(line) else {
        return false;
    };
    let rest = line[indent..].trim_end();
    rest.chars().count() >= fence.len && rest.chars().all(|c| c == fence.marker)
}

/// Pre-pass over the raw Markdown.
///
/// Diagram fences are replaced by placeholders before parsing, since their
/// syntax would otherwise be escaped. An indented diagram fence keeps its
/// indent so it stays inside its list item. Math delimiters are normalized
/// outside of fenced code and code spans. Fences nested in other fences are
/// left alone, as is an unclosed diagram fence.
fn prepare(markdown: &str, diagram_language: &str) -> String {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut out = String::with_capacity(markdown.len());
    let mut prose = String::new();

    let mut i = 0;
    while i < lines.len() {
        let Some((fence, info)) = opening_fence(lines[i]) else {
            prose.push_str(lines[i]);
            prose.push('\n');
            i += 1;
            continue;
        };

        out.push_str(&normalize_latex_delimiters(&prose));
        prose.clear();

        let close = lines[i + 1..]
            .iter()
            .position(|line| closes(fence, line))
            .map(|offset| i + 1 + offset);
        let is_diagram = info.split_whitespace().next() == Some(diagram_language);

        match close {
            Some(end) if is_diagram => {
                let indent = fence_indent(lines[i]).unwrap_or(0);
                let source = lines[i + 1..end]
                    .iter()
                    .map(|line| strip_indent(line, indent))
                    .collect::<Vec<_>>()
                    .join("\n");
                out.push('\n');
                out.push_str(&" ".repeat(indent));
                out.push_str(&placeholder_html(&source));
                out.push_str("\n\n");
                i = end + 1;
            }
            Some(end) => {
                for line in &lines[i..=end] {
                    out.push_str(line);
                    out.push('\n');
                }
                i = end + 1;
            }
            None => {
                for line in &lines[i..] {
                    out.push_str(line);
                    out.push('\n');
                }
                i = lines.len();
            }
        }
    }

    out.push_str(&normalize_latex_delimiters(&prose));
    out
}

fn highlight_code_block(code: &str, info: Option<&str>) -> String {
    let declared = info
        .and_then(|i| i.split(|c: char| c.is_whitespace() || c == ',' || c == '{').next())
        .filter(|token| !token.is_empty());
    let syntax = match declared {
        Some(token) => SYNTAXES.find_syntax_by_token(token),
        None => code
            .lines()
            .next()
            .and_then(|first| SYNTAXES.find_syntax_by_first_line(first)),
    };
    let lang_class = declared
        .map(|l| format!(" class=\"language-{}\"", htmlescape::encode_attribute(l)))
        .unwrap_or_default();

    let plain = || format!("<pre><code{lang_class}>{}</code></pre>\n", htmlescape::encode_minimal(code));

    let Some(syntax) = syntax else {
        return plain();
    };
    match classed_html(code, syntax) {
        Ok(spans) => format!("<pre class=\"highlight\"><code{lang_class}>{spans}</code></pre>\n"),
        Err(e) => {
            warn!("Failed to highlight {} code block: {}", syntax.name, e);
            plain()
        }
    }
}

fn classed_html(code: &str, syntax: &SyntaxReference) -> Result<String, syntect::Error> {
    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAXES, ClassStyle::Spaced);
    for line in LinesWithEndings::from(code) {
        generator.parse_html_for_line_which_includes_newline(line)?;
    }
    Ok(generator.finalize())
}

/// Stylesheet for the classes emitted by highlighted code blocks.
pub fn highlight_css() -> Option<String> {
    let themes = ThemeSet::load_defaults();
    let theme = themes.themes.get(HIGHLIGHT_THEME)?;
    match css_for_theme_with_class_style(theme, ClassStyle::Spaced) {
        Ok(css) => Some(css),
        Err(e) => {
            warn!("Failed to generate highlight stylesheet: {}", e);
            None
        }
    }
}

fn normalize_latex_delimiters(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i..].starts_with('`') {
            let end = code_span_end(input, i);
            out.push_str(&input[i..end]);
            i = end;
            continue;
        }

        if let Some((open, close, display_mode)) = delimiter_at(input, i) {
            let content_start = i + open.len();
            // Math never reaches into a following code span.
            let search_end = input[content_start..]
                .find('`')
                .map_or(input.len(), |offset| content_start + offset);
            if let Some(close_at) = input[content_start..search_end].find(close) {
                let content_end = content_start + close_at;
                let content = &input[content_start..content_end];
                if display_mode || content.contains('\n') {
                    out.push_str("$$");
                    out.push_str(content);
                    out.push_str("$$");
                } else {
                    out.push('$');
                    out.push_str(content);
                    out.push('$');
                }
                i = content_end + close.len();
                continue;
            }
        }

        if let Some(ch) = input[i..].chars().next() {
            out.push(ch);
            i += ch.len_utf8();
        } else {
            break;
        }
    }

    out
}

fn backtick_run(input: &str, at: usize) -> usize {
    input[at..].bytes().take_while(|&b| b == b'`').count()
}

/// End of the code span opening at `start`. An opener with no matching
/// closing run is only a run of literal backticks.
fn code_span_end(input: &str, start: usize) -> usize {
    let run = backtick_run(input, start);
    let mut search = start + run;
    while let Some(offset) = input[search..].find('`') {
        let at = search + offset;
        let len = backtick_run(input, at);
        if len == run {
            return at + len;
        }
        search = at + len;
    }
    start + run
}

fn delimiter_at(input: &str, index: usize) -> Option<(&'static str, &'static str, bool)> {
    let tail = &input[index..];
    if tail.starts_with("\\(") {
        Some(("\\(", "\\)", false))
    } else if tail.starts_with("\\[") {
        Some(("\\[", "\\]", true))
    } else {
        None
    }
}

fn render_math_html(source: &str, display_mode: bool) -> String {
    let mut opts = katex::Opts::builder();
    opts.display_mode(display_mode);

    let rendered = match opts.build() {
        Ok(opts) => katex::render_with_opts(source, opts),
        Err(_) => return fallback_math_html(source, display_mode),
    };

    match rendered {
        Ok(html) => html,
        Err(e) => {
            warn!("KaTeX could not render `{}`: {}", source, e);
            fallback_math_html(source, display_mode)
        }
    }
}

fn fallback_math_html(source: &str, display_mode: bool) -> String {
    let class_name = if display_mode { "math math-display" } else { "math math-inline" };
    format!("<span class=\"{class_name}\">{}</span>", htmlescape::encode_minimal(source))
}
