//! Portal homepage crawler.
//!
//! Fetches a news portal's homepage and extracts candidate article links.
//! Links are kept when they look like articles and are dropped when they
//! point at account, tag or author pages.
//!
//! # Link Heuristics
//!
//! A path is an article candidate when it contains `/article`, `/news`,
//! `/story`, `/202` or `detail`, or is long and structured (more than 15
//! characters with a nested segment or two hyphens, or at least two segments
//! and more than 8 characters).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use super::{Capability, Tool, ToolError};
use crate::models::{CandidateLink, PortalListing};

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Path fragments that never lead to articles.
const SKIP_PATHS: &[&str] = &["/login", "/signup", "/tag/", "/author/", "/subscribe"];

/// Shortest anchor text accepted as a title.
const MIN_TITLE_CHARS: usize = 3;
const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct PortalCrawler {
    client: Client,
}

impl PortalCrawler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Crawl one portal homepage for candidate links.
    #[instrument(level = "info", skip(self))]
    pub async fn crawl(&self, portal_url: &str) -> Result<PortalListing, ToolError> {
        let base = Url::parse(portal_url).map_err(|e| ToolError::InvalidUrl {
            capability: Capability::PortalSearch,
            url: portal_url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(base.clone())
            .send()
            .await
            .map_err(|source| ToolError::Http {
                capability: Capability::PortalSearch,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Status {
                capability: Capability::PortalSearch,
                status: status.as_u16(),
                url: portal_url.to_string(),
            });
        }
        let html = response.text().await.map_err(|source| ToolError::Http {
            capability: Capability::PortalSearch,
            source,
        })?;

        let items = extract_candidates(&html, &base);
        info!(count = items.len(), source = portal_url, "Indexed portal candidate links");
        debug!(urls = ?items.iter().map(|c| &c.url).collect::<Vec<_>>(), "Portal URLs");

        Ok(PortalListing {
            portal_url: portal_url.to_string(),
            items,
        })
    }
}

impl Tool for PortalCrawler {
    type Input = String;
    type Output = PortalListing;

    fn capability(&self) -> Capability {
        Capability::PortalSearch
    }

    async fn invoke(&self, input: String) -> Result<PortalListing, ToolError> {
        self.crawl(&input).await
    }
}

/// Extract deduplicated article candidates from a homepage document.
pub fn extract_candidates(html: &str, portal: &Url) -> Vec<CandidateLink> {
    let document = Html::parse_document(html);
    let portal_key = dedup_key(portal);
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for element in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let text = element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
        if text.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        let Ok(mut resolved) = portal.join(href.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);

        let key = dedup_key(&resolved);
        if key == portal_key {
            continue;
        }
        let path = resolved.path().to_lowercase();
        if SKIP_PATHS.iter().any(|skip| path.contains(skip)) || !is_article_path(&path) {
            continue;
        }
        if !seen.insert(key) {
            continue;
        }
        items.push(CandidateLink {
            title: text.chars().take(MAX_TITLE_CHARS).collect(),
            url: resolved.to_string(),
        });
    }
    items
}

/// Whether a lowercase URL path looks like an article page.
pub fn is_article_path(path: &str) -> bool {
    let segments = path.split('/').filter(|s| !s.is_empty()).count();
    let nested = path.get(1..).is_some_and(|rest| rest.contains('/'));
    ["/article", "/news", "/story", "/202", "detail"]
        .iter()
        .any(|marker| path.contains(marker))
        || (path.len() > 15 && (nested || path.matches('-').count() >= 2))
        || (segments >= 2 && path.len() > 8)
}

/// Normalized form used for deduplication: no fragment, no trailing slash.
pub fn dedup_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.as_str().trim_end_matches('/').to_string()
}

/// The bare domain root of `portal_url`, when it differs from the portal.
///
/// `https://news.example.com/world/` gives `https://news.example.com/`;
/// a portal that already is the root gives `None`.
pub fn bare_root(portal_url: &str) -> Option<String> {
    let url = Url::parse(portal_url).ok()?;
    let root = format!("{}/", url.origin().ascii_serialization());
    let portal_norm = format!("{}/", portal_url.trim_end_matches('/'));
    (root != portal_norm).then_some(root)
}
