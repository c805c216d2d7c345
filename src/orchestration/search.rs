//! Serper.dev web search.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CapabilityError;
use crate::orchestration::capability::{CapabilityResult, SearchHit, SearchTool};

pub const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";
pub const DEFAULT_API_KEY_ENV: &str = "SERPER_API_KEY";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

impl From<OrganicResult> for SearchHit {
    fn from(r: OrganicResult) -> Self {
        SearchHit {
            title: r.title,
            snippet: r.snippet,
            url: r.link,
        }
    }
}

/// Web search over the Serper.dev HTTP API.
#[derive(Clone)]
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl SerperSearch {
    pub fn new(api_key: String, endpoint: String, max_results: usize) -> CapabilityResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CapabilityError::Search(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            endpoint,
            max_results,
        })
    }

    /// Build from the API key in env var `api_key_env`.
    ///
    /// Returns `Ok(None)` when the variable is unset or empty.
    pub fn from_env(
        api_key_env: &str,
        endpoint: &str,
        max_results: usize,
    ) -> CapabilityResult<Option<Self>> {
        match std::env::var(api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                Self::new(key, endpoint.to_string(), max_results).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    fn parse_response(&self, body: &str) -> CapabilityResult<Vec<SearchHit>> {
        let response: SearchResponse = serde_json::from_str(body)
            .map_err(|e| CapabilityError::Search(format!("invalid response: {}", e)))?;
        Ok(response
            .organic
            .into_iter()
            .take(self.max_results)
            .map(SearchHit::from)
            .collect())
    }
}

#[async_trait]
impl SearchTool for SerperSearch {
    async fn search(&self, query: &str) -> CapabilityResult<Vec<SearchHit>> {
        debug!(%query, endpoint = %self.endpoint, "web search");
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&SearchRequest { q: query })
            .send()
            .await
            .map_err(|e| CapabilityError::Search(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::Search(e.to_string()))?;
        if !status.is_success() {
            return Err(CapabilityError::Search(format!(
                "Serper API error ({}): {}",
                status,
                body.trim()
            )));
        }

        let hits = self.parse_response(&body)?;
        debug!(%query, hits = hits.len(), "web search finished");
        Ok(hits)
    }
}

impl std::fmt::Debug for SerperSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperSearch")
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}
