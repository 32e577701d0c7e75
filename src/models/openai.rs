//! A client for OpenAI-compatible model servers, like Ollama, vLLM and
//! LiteLLM.

use std::{env, time::Duration};

use async_openai::{Client, config::OpenAIConfig, error::OpenAIError};
use serde_json::json;

use crate::{
    page_iter::Page,
    prelude::*,
    retry::{
        ModelError, ModelRetryResult, retry_result_fatal, retry_result_ok,
        retry_transient, try_potentially_transient,
    },
};

use super::{
    GeneratedSequence, GenerationOptions, TextModel, TokenUsage, VisionModel, with_timeout,
};

/// Where we look for a server when nothing is configured. This is a local
/// Ollama install.
const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

/// Pick an API base from `OPENAI_API_BASE` or `OLLAMA_URL`.
fn resolve_api_base(openai_api_base: Option<String>, ollama_url: Option<String>) -> String {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    if let Some(base) = non_empty(openai_api_base) {
        return base;
    }
    if let Some(url) = non_empty(ollama_url) {
        let url = url.trim().trim_end_matches('/');
        return if url.ends_with("/v1") {
            url.to_owned()
        } else {
            format!("{url}/v1")
        };
    }
    DEFAULT_API_BASE.to_owned()
}

/// Create an OpenAI-compatible client from our environment variables.
pub fn create_model_client() -> Result<Client<OpenAIConfig>> {
    let api_base = resolve_api_base(
        env::var("OPENAI_API_BASE").ok(),
        env::var("OLLAMA_URL").ok(),
    );
    debug!(%api_base, "Using model server");
    let mut client_config = OpenAIConfig::new().with_api_base(api_base);
    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        client_config = client_config.with_api_key(api_key);
    }
    Ok(Client::with_config(client_config))
}

/// The parts of a chat completion response we care about.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// A model served over the OpenAI chat completions API.
#[derive(Debug)]
pub struct OpenAiModel {
    /// Our client.
    client: Client<OpenAIConfig>,
    /// The model name to request.
    model: String,
    /// Text sent alongside each page image.
    task_prompt: Option<String>,
    /// Per-request timeout.
    timeout: Option<Duration>,
}

impl OpenAiModel {
    /// Create a new model client using our environment configuration.
    pub fn new(
        model: impl Into<String>,
        task_prompt: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            client: create_model_client()?,
            model: model.into(),
            task_prompt: task_prompt.map(str::to_owned),
            timeout,
        })
    }

    /// The user message for a page: the task prompt, if any, and the image.
    fn page_messages(&self, page: &Page) -> Value {
        let mut content = Vec::with_capacity(2);
        if let Some(task_prompt) = &self.task_prompt {
            content.push(json!({ "type": "text", "text": task_prompt }));
        }
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": page.to_data_url() },
        }));
        json!([{ "role": "user", "content": content }])
    }

    /// Build a complete request body.
    fn request_body(&self, messages: Value, opts: &GenerationOptions) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": opts.max_new_tokens,
            "temperature": opts.temperature,
            "num_beams": opts.num_beams,
            "use_cache": opts.use_cache,
            "stream": false,
        })
    }

    /// Send a request, retrying transient failures.
    async fn chat(&self, request: Value) -> Result<GeneratedSequence> {
        trace!(%request, "Request");
        retry_transient(|| self.chat_once(&request)).await
    }

    /// Send a request once.
    async fn chat_once(&self, request: &Value) -> ModelRetryResult<GeneratedSequence> {
        let chat = self.client.chat();
        let result: Result<ChatResponse, ModelError<OpenAIError>> =
            with_timeout(self.timeout, chat.create_byot(request)).await;
        let response = try_potentially_transient!(result);

        let token_usage = response.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
        let Some(choice) = response.choices.into_iter().next() else {
            return retry_result_fatal(anyhow!("no choices in model response"));
        };
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return retry_result_fatal(anyhow!("model server refused: content filter"));
        }
        let raw = choice.message.content.unwrap_or_default();
        debug!(model = %self.model, %raw, "Generated");
        retry_result_ok(GeneratedSequence { raw, token_usage })
    }
}

#[async_trait]
impl VisionModel for OpenAiModel {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn generate(
        &self,
        page: &Page,
        opts: &GenerationOptions,
    ) -> Result<GeneratedSequence> {
        let request = self.request_body(self.page_messages(page), opts);
        self.chat(request)
            .await
            .with_context(|| format!("generation failed for model {}", self.model))
    }
}

#[async_trait]
impl TextModel for OpenAiModel {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<GeneratedSequence> {
        let messages = json!([{ "role": "user", "content": prompt }]);
        let request = self.request_body(messages, opts);
        self.chat(request)
            .await
            .with_context(|| format!("completion failed for model {}", self.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(task_prompt: Option<&str>) -> OpenAiModel {
        OpenAiModel {
            client: Client::with_config(OpenAIConfig::new()),
            model: "test-model".to_owned(),
            task_prompt: task_prompt.map(str::to_owned),
            timeout: None,
        }
    }

    #[test]
    fn api_base_prefers_openai_then_ollama() {
        assert_eq!(resolve_api_base(None, None), DEFAULT_API_BASE);
        assert_eq!(
            resolve_api_base(Some("http://gw:4000".to_owned()), Some("http://x".to_owned())),
            "http://gw:4000"
        );
        assert_eq!(
            resolve_api_base(None, Some("http://ollama:11434/".to_owned())),
            "http://ollama:11434/v1"
        );
        assert_eq!(
            resolve_api_base(Some(" ".to_owned()), Some("http://o/v1".to_owned())),
            "http://o/v1"
        );
    }

    #[test]
    fn page_requests_carry_task_prompt_and_image() {
        let page = Page {
            mime_type: "image/png".to_owned(),
            data: b"abc".to_vec(),
        };
        let model = model(Some("<s_rvlcdip>"));
        let body = model.request_body(model.page_messages(&page), &GenerationOptions::default());
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "<s_rvlcdip>");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,YWJj");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["num_beams"], 1);
        assert_eq!(body["use_cache"], false);
    }

    #[test]
    fn page_requests_without_task_prompt_send_only_the_image() {
        let page = Page {
            mime_type: "image/png".to_owned(),
            data: vec![1, 2, 3],
        };
        let messages = model(None).page_messages(&page);
        let content = messages[0]["content"].as_array().expect("content array");
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "image_url");
    }

    #[test]
    fn responses_tolerate_missing_usage() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }],
        }))
        .expect("valid response");
        assert!(response.usage.is_none());
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    #[ignore = "needs a model server at OPENAI_API_BASE"]
    async fn generates_against_a_live_server() -> Result<()> {
        let model = OpenAiModel::new("llama3.2:3b", None, Some(Duration::from_secs(60)))?;
        let out = model
            .complete("Say hello.", &GenerationOptions::default())
            .await?;
        assert!(!out.raw.is_empty());
        Ok(())
    }
}
