//! Markdown to HTML rendering for post bodies.

use pulldown_cmark::{html, Options, Parser};

/// Turns the raw text of a post into the HTML stored next to it.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, raw: &str) -> String;
}

/// CommonMark renderer with tables and strikethrough, sanitized by `ammonia`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMarkRenderer;

impl MarkdownRenderer for CommonMarkRenderer {
    fn render(&self, raw: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = Parser::new_ext(raw, options);
        let mut unsafe_html = String::with_capacity(raw.len() * 3 / 2);
        html::push_html(&mut unsafe_html, parser);

        sanitize_html(&unsafe_html)
    }
}

/// Strip anything but basic formatting tags from rendered HTML.
#[must_use]
pub fn sanitize_html(html: &str) -> String {
    let mut sanitizer = ammonia::Builder::default();
    sanitizer.add_tags(["del", "ins", "table", "thead", "tbody", "tr", "th", "td"]);
    sanitizer.clean(html).to_string()
}
