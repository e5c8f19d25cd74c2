//! Serper-compatible web search.
//!
//! `POST {endpoint}` with an `X-API-KEY` header and `{"q", "num"}` body; the
//! hits are read from the `organic` array in rank order.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{Capability, Tool, ToolError};
use crate::config::{MAX_SEARCH_RESULTS, SearchSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub num_results: usize,
}

/// One organic result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Clone)]
pub struct SerperSearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl SerperSearch {
    pub fn new(client: Client, settings: &SearchSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        }
    }

    #[instrument(level = "info", skip(self), fields(query = %request.query))]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ToolError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ToolError::Config {
            capability: Capability::WebSearch,
            message: "no search API key (set search.api_key or SERPER_API_KEY)".to_string(),
        })?;
        let num = request.num_results.clamp(1, MAX_SEARCH_RESULTS);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": request.query, "num": num }))
            .send()
            .await
            .map_err(|source| ToolError::Http {
                capability: Capability::WebSearch,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Status {
                capability: Capability::WebSearch,
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        let body: SerperResponse = response.json().await.map_err(|e| ToolError::Response {
            capability: Capability::WebSearch,
            message: e.to_string(),
        })?;

        let mut hits = body.organic;
        hits.truncate(num);
        debug!(count = hits.len(), "Search returned hits");
        Ok(hits)
    }
}

impl Tool for SerperSearch {
    type Input = SearchRequest;
    type Output = Vec<SearchHit>;

    fn capability(&self) -> Capability {
        Capability::WebSearch
    }

    async fn invoke(&self, input: SearchRequest) -> Result<Vec<SearchHit>, ToolError> {
        self.search(&input).await
    }
}
