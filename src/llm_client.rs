use std::env;
use std::sync::Arc;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use tracing::instrument;

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Single call-and-get-text contract to the completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Sampling and framing knobs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
}

impl CompletionOptions {
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    const DEFAULT_TEMPERATURE: f32 = 0.2;
    const DEFAULT_SYSTEM_PROMPT: &'static str =
        "You are a clinical decision-support assistant. Ground every statement in the supplied report, state uncertainty explicitly, and never invent findings.";

    pub fn from_env() -> anyhow::Result<Self> {
        let model =
            env::var("MEDQUORUM_LLM_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        let temperature = match env::var("MEDQUORUM_LLM_TEMPERATURE") {
            Ok(raw) => raw
                .parse::<f32>()
                .context("MEDQUORUM_LLM_TEMPERATURE must be a float")?,
            Err(_) => Self::DEFAULT_TEMPERATURE,
        };

        let system_prompt = env::var("MEDQUORUM_SYSTEM_PROMPT")
            .unwrap_or_else(|_| Self::DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(Self {
            model,
            temperature,
            system_prompt,
        })
    }
}

/// Offline stand-in so the pipeline can be exercised without credentials.
#[derive(Debug, Default, Clone)]
pub struct EchoLlmClient;

impl EchoLlmClient {
    pub fn shared() -> SharedLlmClient {
        Arc::new(Self)
    }
}

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(format!(
            "[stubbed consult]\nPrompt received:\n{prompt}\nConnect an OpenAI-compatible backend for real output."
        ))
    }
}

/// OpenAI-compatible chat client; points at OpenAI or any compatible backend.
/// Credentials are threaded in at construction, never looked up per call.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    options: CompletionOptions,
}

impl OpenAiLlmClient {
    pub fn new(config: OpenAIConfig, options: CompletionOptions) -> Self {
        Self {
            client: AsyncOpenAiClient::with_config(config),
            options,
        }
    }

    pub fn shared_from_env() -> anyhow::Result<SharedLlmClient> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("Set OPENAI_API_KEY to use the OpenAI completion client")?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            config = config.with_api_base(base_url);
        }

        let options = CompletionOptions::from_env()?;
        Ok(Arc::new(Self::new(config, options)))
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    #[instrument(level = "debug", skip_all)]
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.options.system_prompt.as_str())
            .build()?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.options.model)
            .temperature(self.options.temperature)
            .messages(vec![system_message.into(), user_message.into()])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .context("LLM response did not contain any choices")?
            .message
            .content
            .unwrap_or_else(|| String::from("[empty LLM response]"));

        Ok(text)
    }
}

/// Build the OpenAI-compatible client, optionally falling back to the echo stub.
pub fn build_llm_client_from_env(default_to_echo: bool) -> anyhow::Result<SharedLlmClient> {
    match OpenAiLlmClient::shared_from_env() {
        Ok(client) => Ok(client),
        Err(err) if default_to_echo => {
            tracing::warn!(?err, "Falling back to EchoLlmClient");
            Ok(EchoLlmClient::shared())
        }
        Err(err) => Err(err),
    }
}
