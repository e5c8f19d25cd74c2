//! Capabilities the pipeline can invoke: crawling, searching, reading files.
//!
//! Every capability implements [`Tool`], a single `invoke(input) -> output`
//! contract with typed input and output. The orchestrator decides which
//! stage calls which tool; nothing here is chosen by the model.
//!
//! | Capability | Tool | Input | Output |
//! |------------|------|-------|--------|
//! | [`Capability::PortalSearch`] | [`portal::PortalCrawler`] | portal URL | [`PortalListing`](crate::models::PortalListing) |
//! | [`Capability::ArticleFetch`] | [`article::ArticleCrawler`] | `[{url}]` | url → [`article::CrawlEntry`] |
//! | [`Capability::WebSearch`] | [`search::SerperSearch`] | [`search::SearchRequest`] | `[{title, link, snippet}]` |
//! | [`Capability::FileRead`] | [`file::FileReader`] | path | file contents |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::config::CrawlSettings;

pub mod article;
pub mod file;
pub mod portal;
pub mod search;

/// The closed set of capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    PortalSearch,
    ArticleFetch,
    WebSearch,
    FileRead,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PortalSearch => "portal_search",
            Self::ArticleFetch => "article_fetch",
            Self::WebSearch => "web_search",
            Self::FileRead => "file_read",
        })
    }
}

/// One capability behind a uniform structured interface.
pub trait Tool {
    type Input;
    type Output;

    fn capability(&self) -> Capability;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, ToolError>;
}

/// Failure of a tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{capability}: invalid url {url:?}: {reason}")]
    InvalidUrl {
        capability: Capability,
        url: String,
        reason: String,
    },

    #[error("{capability}: request failed: {source}")]
    Http {
        capability: Capability,
        #[source]
        source: reqwest::Error,
    },

    #[error("{capability}: HTTP {status} from {url}")]
    Status {
        capability: Capability,
        status: u16,
        url: String,
    },

    #[error("{capability}: {message}")]
    Config {
        capability: Capability,
        message: String,
    },

    #[error("{capability}: could not read {path:?}: {source}")]
    Io {
        capability: Capability,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{capability}: unexpected response: {message}")]
    Response {
        capability: Capability,
        message: String,
    },
}

/// Build the HTTP client shared by the crawl and search tools.
pub fn http_client(settings: &CrawlSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
}
