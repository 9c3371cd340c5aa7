use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use narcissus_core::config::SearchConfig;
use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::traits::SearchClient;
use narcissus_core::types::SearchHit;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Tavily web search.
pub struct TavilyClient {
    api_key: Option<String>,
    base_url: String,
    search_depth: String,
    max_results: u32,
    http: reqwest::Client,
}

impl TavilyClient {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| TAVILY_API_URL.to_string()),
            search_depth: config.search_depth.clone(),
            max_results: config.max_results,
            http: reqwest::Client::new(),
        }
    }

    fn body(&self, api_key: &str, query: &str) -> serde_json::Value {
        json!({
            "api_key": api_key,
            "query": query,
            "search_depth": self.search_depth,
            "max_results": self.max_results,
        })
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl From<TavilyResult> for SearchHit {
    fn from(r: TavilyResult) -> Self {
        Self {
            content: r.content,
            source: r.url,
            title: r.title,
        }
    }
}

impl SearchClient for TavilyClient {
    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            let failed = |message: String| NarcissusError::Search {
                query: query.clone(),
                message,
            };

            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| failed("search.api_key is not set".into()))?;

            let resp = self
                .http
                .post(&self.base_url)
                .json(&self.body(api_key, &query))
                .send()
                .await
                .map_err(|e| failed(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
                return Err(failed(format!("HTTP {}: {}", status, body)));
            }

            let body: TavilyResponse = resp.json().await.map_err(|e| failed(e.to_string()))?;
            let hits: Vec<SearchHit> = body.results.into_iter().map(SearchHit::from).collect();
            debug!(query = %query, hits = hits.len(), "Search complete");
            Ok(hits)
        })
    }
}
