use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

// Wide enough that html2text never wraps prose.
const TEXT_WIDTH: usize = 10_000;

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "svg", "iframe", "template",
];

const VOID_TAGS: &[&str] = &["area", "br", "col", "embed", "hr", "img", "input", "source", "wbr"];

static CONTENT_ROOTS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", "main", "body"]
        .into_iter()
        .map(|tag| Selector::parse(tag).expect("content root selector is valid"))
        .collect()
});

static REDUNDANT_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

/// Downloads article pages and reduces them to their readable text.
pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Fetch the page at `article_url` and return its main text.
    pub async fn fetch_full_content(&self, article_url: &str) -> Result<String> {
        let url = Url::parse(article_url)
            .map_err(|e| AppError::Extraction(format!("invalid link {}: {}", article_url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let response = self.client.get(url).headers(headers).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Extraction(format!(
                "failed to fetch {}: HTTP {}",
                article_url,
                response.status()
            )));
        }

        let html = response.text().await?;

        extract_content(&html)
            .ok_or_else(|| AppError::Extraction(format!("no readable text at {}", article_url)))
    }
}

/// Extract readable text from an HTML document or fragment.
///
/// The first of `<article>`, `<main>` or `<body>` present is used as the
/// content root, and boilerplate elements below it are dropped.
pub fn extract_content(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let root = CONTENT_ROOTS
        .iter()
        .find_map(|selector| document.select(selector).next())?;

    let mut markup = String::new();
    write_children(root, &mut markup);

    let text = match html2text::from_read(markup.as_bytes(), TEXT_WIDTH) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let cleaned = cleanup_text(
        &text
            .lines()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Collapse every run of three or more newlines into a single newline.
pub fn cleanup_text(text: &str) -> String {
    REDUNDANT_NEWLINES.replace_all(text, "\n").into_owned()
}

/// Re-serializes the children of `element` without boilerplate subtrees
/// and without attributes, which html2text would otherwise turn into
/// link footnotes.
fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => escape_into(text, out),
            Node::Element(el) => {
                let name = el.name();
                if BOILERPLATE_TAGS.contains(&name) {
                    continue;
                }

                out.push('<');
                out.push_str(name);
                out.push('>');
                if VOID_TAGS.contains(&name) {
                    continue;
                }

                if let Some(child) = ElementRef::wrap(child) {
                    write_children(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            _ => {}
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}
