use async_trait::async_trait;

use crate::Error;
use crate::llms::LlmProvider;

/// Test provider: returns a canned response, or fails every call.
pub struct MockLlm {
    response: Option<String>,
}

impl MockLlm {
    pub fn returning(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
        }
    }

    /// Simulates an unreachable or quota-exhausted model endpoint.
    pub fn failing() -> Self {
        Self { response: None }
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete_prompt(&self, _prompt: &str) -> Result<String, Error> {
        match &self.response {
            Some(r) => Ok(r.clone()),
            None => Err(Error::Llm(async_openai::error::OpenAIError::StreamError(
                "mock provider failure".to_string(),
            ))),
        }
    }
}
