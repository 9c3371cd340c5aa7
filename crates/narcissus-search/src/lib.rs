pub mod tavily;

use narcissus_core::config::SearchConfig;
use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::traits::SearchClient;

pub use tavily::TavilyClient;

/// Create a search client based on the provider name.
pub fn create_client(config: &SearchConfig) -> Result<Box<dyn SearchClient>> {
    match config.provider.as_str() {
        "tavily" => Ok(Box::new(TavilyClient::new(config))),
        other => Err(NarcissusError::Config(format!(
            "unsupported search provider: {}",
            other
        ))),
    }
}
