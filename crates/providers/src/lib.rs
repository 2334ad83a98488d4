//! Provider abstractions for LLM completion and the search index service.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod meili;
pub mod openai;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("empty response")]
    EmptyResponse,
    #[error("task {uid} failed: {message}")]
    TaskFailed { uid: u64, message: String },
    #[error("task {uid} did not finish within {timeout:?}")]
    TaskTimeout { uid: u64, timeout: std::time::Duration },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::RequestFailed(err.to_string())
    }
}

/// A chat-style model that answers a single prompt with free text.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    llms: HashMap<String, Arc<dyn LlmProvider>>,
    pub preferred_llm: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, name: &str, provider: Arc<dyn LlmProvider>) -> Self {
        self.llms.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_llm(mut self, name: &str) -> Self {
        self.preferred_llm = Some(name.to_string());
        self
    }

    pub fn llm(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_llm.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no llm provider configured".into()))?;
        self.llms
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl LlmProvider for Echo {
        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn registry_resolves_preferred_llm() {
        let reg = ProviderRegistry::new()
            .with_llm("echo", Arc::new(Echo))
            .set_preferred_llm("echo");
        assert!(reg.llm(None).is_ok());
        assert!(matches!(
            reg.llm(Some("groq")),
            Err(ProviderError::UnknownProvider(name)) if name == "groq"
        ));
    }

    #[test]
    fn empty_registry_has_no_default() {
        let reg = ProviderRegistry::new();
        assert!(reg.llm(None).is_err());
    }
}
