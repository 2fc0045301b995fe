pub mod mock;
pub mod openai;
pub mod prompts;

use async_trait::async_trait;

pub use mock::MockLlm;
pub use openai::OpenAi;
pub use prompts::prompt_classify_pdf;

use crate::Error;

/// Interface to a hosted LLM that lets us complete a prompt and await a response.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_prompt(&self, prompt: &str) -> Result<String, Error>;
}
