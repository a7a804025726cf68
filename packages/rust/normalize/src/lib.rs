//! HTML fragment to line-oriented text, for summarizer input.
//!
//! Markup is flattened into one line per text run. Links survive as
//! `<a href="...">text</a>` lines with site-relative destinations made
//! absolute, so a summary can cite them. Stored observations keep the raw
//! markup; this transform only feeds the summarizer.

use scraper::node::Node;
use scraper::{ElementRef, Html};
use tracing::{debug, instrument};
use url::Url;

/// Elements whose whole subtree is dropped.
const SKIPPED_TAGS: &[&str] = &["script", "style"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Normalized text of a fragment, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Non-blank lines.
    pub lines: Vec<String>,
}

impl NormalizedContent {
    /// Lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Flatten an HTML fragment fetched from `source_url`.
///
/// - `script` and `style` subtrees are removed.
/// - An anchor with a destination and non-blank text becomes one
///   `<a href="URL">TEXT</a>` line. Destinations starting with `/` or `./`
///   are resolved against the origin of `source_url`; others are kept as-is.
/// - A text node directly under an anchor is not repeated; any other
///   non-blank text node becomes a trimmed line.
/// - Blank lines are discarded.
#[instrument(skip(html), fields(source_url = %source_url))]
pub fn normalize(html: &str, source_url: &str) -> NormalizedContent {
    let origin = site_origin(source_url);
    let fragment = Html::parse_fragment(html);

    let mut raw = Vec::new();
    walk(fragment.root_element(), origin.as_ref(), &mut raw);

    let joined = raw.join("\n");
    let lines: Vec<String> = joined
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect();

    debug!(lines = lines.len(), "fragment normalized");
    NormalizedContent { lines }
}

/// Scheme + host[:port] of the source page, as a base URL.
fn site_origin(source_url: &str) -> Option<Url> {
    let parsed = match Url::parse(source_url) {
        Ok(url) => url,
        Err(e) => {
            debug!(error = %e, "source url unparsable, links kept verbatim");
            return None;
        }
    };
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&origin.ascii_serialization()).ok()
}

fn walk(element: ElementRef<'_>, origin: Option<&Url>, out: &mut Vec<String>) {
    let is_anchor = element.value().name() == "a";

    if is_anchor {
        let href = element.value().attr("href").unwrap_or_default();
        let text = visible_text(element);
        if !href.is_empty() && !text.is_empty() {
            out.push(format!(
                "<a href=\"{}\">{text}</a>",
                resolve_href(href, origin)
            ));
        }
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !SKIPPED_TAGS.contains(&child_element.value().name()) {
                walk(child_element, origin, out);
            }
        } else if let Node::Text(text) = child.value() {
            let trimmed = text.trim();
            if !is_anchor && !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
}

/// Anchor text: every visible text run trimmed and concatenated.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !SKIPPED_TAGS.contains(&child_element.value().name()) {
                text.push_str(&visible_text(child_element));
            }
        } else if let Node::Text(run) = child.value() {
            text.push_str(run.trim());
        }
    }
    text
}

fn resolve_href(href: &str, origin: Option<&Url>) -> String {
    if !(href.starts_with('/') || href.starts_with("./")) {
        return href.to_string();
    }
    match origin.map(|base| base.join(href)) {
        Some(Ok(resolved)) => resolved.to_string(),
        _ => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_relative_link_uses_origin() {
        let out = normalize(r#"<a href="/a/b">Notice</a>"#, "https://x.example/path");
        assert_eq!(out.lines, vec![r#"<a href="https://x.example/a/b">Notice</a>"#]);
    }

    #[test]
    fn dot_relative_link_uses_origin() {
        let out = normalize(
            r#"<a href="./n/2.html">Second</a>"#,
            "http://news.example:8080/deep/index.html",
        );
        assert_eq!(
            out.lines,
            vec![r#"<a href="http://news.example:8080/n/2.html">Second</a>"#]
        );
    }

    #[test]
    fn other_links_kept_verbatim() {
        let html = r#"<a href="https://other.example/x">Abs</a><a href="rel.html">Rel</a>"#;
        let out = normalize(html, "https://x.example/path/");
        assert_eq!(
            out.lines,
            vec![
                r#"<a href="https://other.example/x">Abs</a>"#,
                r#"<a href="rel.html">Rel</a>"#,
            ]
        );
    }

    #[test]
    fn script_and_style_removed() {
        let html = "<div><script>var x = 1;</script><style>p{}</style><p>Kept</p></div>";
        let out = normalize(html, "https://x.example/");
        assert_eq!(out.lines, vec!["Kept"]);
    }

    #[test]
    fn text_and_links_in_document_order() {
        let html = r#"
            <ul>
              <li><span>2024-05-01</span> <a href="/n/1">  Tender notice </a></li>
              <li>Plain item</li>
            </ul>"#;
        let out = normalize(html, "https://x.example/list");
        assert_eq!(
            out.text(),
            "2024-05-01\n<a href=\"https://x.example/n/1\">Tender notice</a>\nPlain item"
        );
    }

    #[test]
    fn anchor_without_href_or_text_is_dropped() {
        let html = r#"<a>no destination</a><a href="/x">   </a><p>after</p>"#;
        let out = normalize(html, "https://x.example/");
        assert_eq!(out.lines, vec!["after"]);
    }

    #[test]
    fn nested_anchor_text_concatenated() {
        let html = r#"<a href="/x"> Read <b>more</b> </a>"#;
        let out = normalize(html, "https://x.example/");
        // The bold run is also a text node outside a direct anchor parent.
        assert_eq!(
            out.lines,
            vec![r#"<a href="https://x.example/x">Readmore</a>"#, "more"]
        );
    }

    #[test]
    fn comments_and_blank_text_skipped() {
        let html = "<div>\n\n  <!-- hidden -->  <p>\n</p><p>Body</p></div>";
        let out = normalize(html, "https://x.example/");
        assert_eq!(out.lines, vec!["Body"]);
    }

    #[test]
    fn unparsable_source_keeps_relative_links() {
        let out = normalize(r#"<a href="/a">A</a>"#, "not a url");
        assert_eq!(out.lines, vec![r#"<a href="/a">A</a>"#]);
        assert!(!out.is_empty());
    }
}
