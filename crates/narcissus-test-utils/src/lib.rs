//! Mock LLM and search clients for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::traits::{LlmClient, SearchClient, StructuredRequest};
use narcissus_core::types::SearchHit;

/// LLM that answers from canned responses chosen by prompt substring.
///
/// Rules are checked in the order they were added. A completion with no
/// matching rule returns `"completion #n"`; a prediction with no matching
/// rule returns an empty research plan.
#[derive(Default)]
pub struct ScriptedLlm {
    completions: Vec<(String, String)>,
    predictions: Vec<(String, Value)>,
    completed: Mutex<Vec<String>>,
    predicted: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer completions whose prompt contains `needle` with `response`.
    pub fn on_complete(mut self, needle: &str, response: &str) -> Self {
        self.completions.push((needle.to_string(), response.to_string()));
        self
    }

    /// Answer predictions whose prompt contains `needle` with `value`.
    pub fn on_predict(mut self, needle: &str, value: Value) -> Self {
        self.predictions.push((needle.to_string(), value));
        self
    }

    /// Answer predictions whose prompt contains `needle` with a plan of `queries`.
    pub fn on_plan(self, needle: &str, queries: &[&str]) -> Self {
        let queries: Vec<Value> = queries.iter().map(|q| json!({ "query": q })).collect();
        self.on_predict(needle, json!({ "queries": queries }))
    }

    /// Prompts passed to `complete`, in call order.
    pub fn completions(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Prompts passed to `predict_json`, in call order.
    pub fn predictions(&self) -> Vec<String> {
        self.predicted.lock().unwrap().clone()
    }

    /// Completions whose prompt contains `needle`.
    pub fn completions_matching(&self, needle: &str) -> usize {
        self.completed
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        let response = self
            .completions
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        let mut log = self.completed.lock().unwrap();
        log.push(prompt);
        let response = response.unwrap_or_else(|| format!("completion #{}", log.len()));
        Box::pin(async move { Ok(response) })
    }

    fn predict_json(&self, request: StructuredRequest) -> BoxFuture<'_, Result<Value>> {
        let value = self
            .predictions
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| json!({ "queries": [] }));
        self.predicted.lock().unwrap().push(request.prompt);
        Box::pin(async move { Ok(value) })
    }
}

/// LLM whose calls never return.
pub struct StallingLlm;

impl LlmClient for StallingLlm {
    fn complete(&self, _prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(futures::future::pending())
    }

    fn predict_json(&self, _request: StructuredRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(futures::future::pending())
    }
}

/// LLM whose calls fail with `LlmRequest`.
pub struct FailingLlm {
    pub message: String,
}

impl FailingLlm {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl LlmClient for FailingLlm {
    fn complete(&self, _prompt: String) -> BoxFuture<'_, Result<String>> {
        let message = self.message.clone();
        Box::pin(async move { Err(NarcissusError::LlmRequest(message)) })
    }

    fn predict_json(&self, _request: StructuredRequest) -> BoxFuture<'_, Result<Value>> {
        let message = self.message.clone();
        Box::pin(async move { Err(NarcissusError::LlmRequest(message)) })
    }
}

/// Search service with canned results, optional latency, and a concurrency gauge.
#[derive(Default)]
pub struct MockSearch {
    results: HashMap<String, Vec<SearchHit>>,
    latency: Duration,
    calls: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.to_string(), hits);
        self
    }

    /// Delay every search by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queries searched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Most searches seen in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl SearchClient for MockSearch {
    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(query.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            Ok(self.results.get(&query).cloned().unwrap_or_else(|| {
                vec![SearchHit::new(
                    format!("Notes about {}", query),
                    format!("https://example.com/{}", query.replace(' ', "-")),
                )]
            }))
        })
    }
}

/// Search service whose calls fail.
pub struct FailingSearch;

impl SearchClient for FailingSearch {
    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            Err(NarcissusError::Search {
                query,
                message: "service unavailable".to_string(),
            })
        })
    }
}
