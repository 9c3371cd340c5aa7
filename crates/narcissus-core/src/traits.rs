use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::error::{NarcissusError, Result};
use crate::prompts;
use crate::types::SearchHit;

/// A structured-prediction request: the model must answer with JSON matching `schema`.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Schema name reported to the provider.
    pub name: String,
    /// JSON Schema of the expected object.
    pub schema: serde_json::Value,
    pub prompt: String,
}

/// LLM client — text completion and structured prediction.
pub trait LlmClient: Send + Sync + 'static {
    /// Complete a single prompt and return the response text.
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>>;

    /// Ask for a JSON object matching the request schema.
    fn predict_json(&self, request: StructuredRequest) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Search service — web search for research queries.
pub trait SearchClient: Send + Sync + 'static {
    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<SearchHit>>>;
}

/// A type the LLM can be asked to produce via [`predict`].
pub trait StructuredOutput: DeserializeOwned + Send {
    /// Schema name, e.g. `"ResearchPlan"`.
    fn name() -> &'static str;

    /// JSON Schema describing the type.
    fn schema() -> serde_json::Value;
}

/// Render `template` with `vars`, ask the LLM for a `T`, and decode it.
pub async fn predict<T: StructuredOutput>(
    llm: &dyn LlmClient,
    template: &str,
    vars: &[(&str, &str)],
) -> Result<T> {
    let prompt = prompts::render(template, vars)?;
    let request = StructuredRequest {
        name: T::name().to_string(),
        schema: T::schema(),
        prompt,
    };
    let value = llm.predict_json(request).await?;
    serde_json::from_value(value)
        .map_err(|e| NarcissusError::LlmParse(format!("{} does not match schema: {}", T::name(), e)))
}
