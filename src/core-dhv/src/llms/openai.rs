use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

use crate::Error;
use crate::llms::LlmProvider;

const MODEL: &str = "gpt-4o-mini";

/// OpenAI-backed provider. The credential comes from `LLM_API_KEY`.
pub struct OpenAi {
    client: Client<OpenAIConfig>,
}

impl OpenAi {
    pub fn new() -> Self {
        let config = match std::env::var("LLM_API_KEY") {
            Ok(key) => OpenAIConfig::new().with_api_key(key),
            Err(_) => {
                tracing::warn!("LLM_API_KEY not set; classification will rely on the filename fallback");
                OpenAIConfig::new()
            }
        };
        Self {
            client: Client::with_config(config),
        }
    }
}

impl Default for OpenAi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OpenAi {
    async fn complete_prompt(&self, prompt: &str) -> Result<String, Error> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(MODEL)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You classify manufacturer PDF documents. Answer with JSON only.")
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                Error::Llm(async_openai::error::OpenAIError::StreamError(
                    "No response content from model".to_string(),
                ))
            })
    }
}
