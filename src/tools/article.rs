//! Article page crawler.
//!
//! Fetches each URL in turn and turns the main content into Markdown.
//! A failing URL produces an entry with `error` set; it never aborts the
//! batch.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{Capability, Tool, ToolError};

static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).expect("static selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("static selector"));
static CONTENT_ROOTS: Lazy<[Selector; 3]> = Lazy::new(|| {
    ["article", "main", "body"].map(|s| Selector::parse(s).expect("static selector"))
});
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Elements dropped before conversion.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "noscript", "iframe", "svg",
];

/// One URL to crawl.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UrlRef {
    pub url: String,
}

impl From<&str> for UrlRef {
    fn from(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

/// Crawl result for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrawlEntry {
    pub url: String,
    pub markdown: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlEntry {
    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArticleCrawler {
    client: Client,
}

impl ArticleCrawler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Crawl every URL sequentially; the map has one entry per distinct URL.
    #[instrument(level = "info", skip_all, fields(count = urls.len()))]
    pub async fn crawl_all(&self, urls: Vec<UrlRef>) -> HashMap<String, CrawlEntry> {
        let entries: HashMap<String, CrawlEntry> = stream::iter(urls)
            .then(|target| async move {
                let entry = match self.fetch(&target.url).await {
                    Ok(entry) => {
                        debug!(url = %target.url, bytes = entry.markdown.len(), "Fetched article");
                        entry
                    }
                    Err(e) => {
                        warn!(error = %e, url = %target.url, "Article fetch failed");
                        CrawlEntry::failed(&target.url, e.to_string())
                    }
                };
                (target.url, entry)
            })
            .collect()
            .await;

        info!(
            fetched = entries.values().filter(|e| e.error.is_none()).count(),
            total = entries.len(),
            "Fetched article contents"
        );
        entries
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str) -> Result<CrawlEntry, ToolError> {
        let parsed = Url::parse(url).map_err(|e| ToolError::InvalidUrl {
            capability: Capability::ArticleFetch,
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ToolError::InvalidUrl {
                capability: Capability::ArticleFetch,
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|source| ToolError::Http {
                capability: Capability::ArticleFetch,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Status {
                capability: Capability::ArticleFetch,
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let html = response.text().await.map_err(|source| ToolError::Http {
            capability: Capability::ArticleFetch,
            source,
        })?;

        let (title, markdown) = extract_article(&html);
        if markdown.trim().is_empty() {
            return Err(ToolError::Response {
                capability: Capability::ArticleFetch,
                message: format!("{url} has no readable content"),
            });
        }
        Ok(CrawlEntry {
            url: url.to_string(),
            markdown,
            title,
            error: None,
        })
    }
}

impl Tool for ArticleCrawler {
    type Input = Vec<UrlRef>;
    type Output = HashMap<String, CrawlEntry>;

    fn capability(&self) -> Capability {
        Capability::ArticleFetch
    }

    async fn invoke(&self, input: Vec<UrlRef>) -> Result<Self::Output, ToolError> {
        Ok(self.crawl_all(input).await)
    }
}

/// Title and Markdown body of an article page.
///
/// The title comes from `og:title`, then `<title>`, then the first `<h1>`.
/// The body is the first of `article`, `main` or `body`, converted with
/// `htmd`; the element's plain text is used if conversion yields nothing.
pub fn extract_article(html: &str) -> (String, String) {
    let document = Html::parse_document(html);

    let title = document
        .select(&OG_TITLE)
        .find_map(|m| m.value().attr("content").map(str::to_string))
        .or_else(|| document.select(&TITLE).next().map(|t| t.text().collect()))
        .or_else(|| document.select(&H1).next().map(|h| h.text().collect()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let Some(root) = CONTENT_ROOTS
        .iter()
        .find_map(|selector| document.select(selector).next())
    else {
        return (title, String::new());
    };

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(NOISE_TAGS.to_vec())
        .build();
    let markdown = match converter.convert(&root.html()) {
        Ok(md) if !md.trim().is_empty() => md,
        Ok(_) => plain_text(&root),
        Err(e) => {
            debug!(error = %e, "htmd conversion failed; using plain text");
            plain_text(&root)
        }
    };
    let markdown = BLANK_RUNS.replace_all(markdown.trim(), "\n\n").into_owned();
    (title, markdown)
}

fn plain_text(element: &scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"
        <html>
          <head>
            <title>Fallback title</title>
            <meta property="og:title" content="Chip export   rules tighten">
            <script>var tracking = 1;</script>
          </head>
          <body>
            <nav>Home | World | Business</nav>
            <article>
              <h1>Chip export rules tighten</h1>
              <p>The commerce department announced new rules on Tuesday.</p>
              <aside>Related: other stories</aside>
              <p>Shipments above the threshold now need a licence.</p>
            </article>
            <footer>Copyright</footer>
          </body>
        </html>
    "#;

    #[test]
    fn extracts_title_and_article_body() {
        let (title, markdown) = extract_article(PAGE);
        assert_eq!(title, "Chip export rules tighten");
        assert!(markdown.contains("commerce department announced"));
        assert!(markdown.contains("need a licence"));
        assert!(!markdown.contains("Home | World"));
        assert!(!markdown.contains("Related: other stories"));
        assert!(!markdown.contains("tracking"));
    }

    #[test]
    fn title_falls_back_to_title_then_h1() {
        let (title, _) = extract_article("<html><head><title>Page</title></head><body><p>x</p></body></html>");
        assert_eq!(title, "Page");
        let (title, _) = extract_article("<html><body><h1>Headline</h1><p>x</p></body></html>");
        assert_eq!(title, "Headline");
    }

    #[tokio::test]
    async fn failures_are_isolated_per_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/news/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ok = format!("{}/news/ok", server.uri());
        let missing = format!("{}/news/missing", server.uri());
        let crawler = ArticleCrawler::new(Client::new());
        let out = crawler
            .invoke(vec![
                UrlRef::from(ok.as_str()),
                UrlRef::from(missing.as_str()),
                UrlRef::from("ftp://example.test/file"),
            ])
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        assert!(out[&ok].error.is_none());
        assert_eq!(out[&ok].title, "Chip export rules tighten");
        assert!(out[&missing].error.as_deref().unwrap().contains("404"));
        assert!(out["ftp://example.test/file"].error.is_some());
    }
}
