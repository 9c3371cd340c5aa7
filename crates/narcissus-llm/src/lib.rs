pub mod providers;

use tracing::debug;

use narcissus_core::config::ModelConfig;
use narcissus_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;

/// Create an LLM client based on the provider name.
///
/// Every supported provider speaks the OpenAI chat-completions API
/// (OpenAI, Ollama, vLLM, Groq, OpenRouter); `base_url` selects the endpoint.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    if config.provider != "openai" {
        debug!(provider = %config.provider, "Using OpenAI-compatible client");
    }
    Box::new(OpenAiClient::new(config.clone()))
}
