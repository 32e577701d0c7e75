//! Pretrained models, reached through a model server.
//!
//! We never run model weights ourselves. Instead, each [`ModelPreset`] names a
//! pretrained checkpoint, and a server speaking the OpenAI chat API (Ollama,
//! vLLM, LiteLLM and friends) runs the actual generation.

use std::{fmt, ops::AddAssign, time::Duration};

use clap::{Args, ValueEnum};
use schemars::JsonSchema;
use tokio::time;

use crate::{decode::OutputKind, page_iter::Page, prelude::*, retry::ModelError};

pub mod openai;

/// Default limit on generated tokens.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 512;

/// The pretrained models we know how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModelPreset {
    /// Donut fine-tuned on RVL-CDIP, for document classification.
    DonutRvlcdip,
    /// TrOCR fine-tuned on handwriting.
    TrocrHandwritten,
    /// TrOCR fine-tuned on printed text.
    TrocrPrinted,
}

impl ModelPreset {
    /// The pretrained checkpoint, which is also the default served model name.
    pub fn checkpoint(self) -> &'static str {
        match self {
            ModelPreset::DonutRvlcdip => "naver-clova-ix/donut-base-finetuned-rvlcdip",
            ModelPreset::TrocrHandwritten => "microsoft/trocr-base-handwritten",
            ModelPreset::TrocrPrinted => "microsoft/trocr-base-printed",
        }
    }

    /// The decoder start sequence this model expects, if any.
    pub fn task_prompt(self) -> Option<&'static str> {
        match self {
            ModelPreset::DonutRvlcdip => Some("<s_rvlcdip>"),
            ModelPreset::TrocrHandwritten | ModelPreset::TrocrPrinted => None,
        }
    }

    /// How should we interpret this model's output?
    pub fn output_kind(self) -> OutputKind {
        match self {
            ModelPreset::DonutRvlcdip => OutputKind::Structured,
            ModelPreset::TrocrHandwritten | ModelPreset::TrocrPrinted => {
                OutputKind::PlainText
            }
        }
    }
}

impl fmt::Display for ModelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => write!(f, "{}", value.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Decoding settings sent with each request.
///
/// The defaults are plain greedy decoding. `num_beams` and `use_cache` are
/// passed through as extra request fields, which many servers ignore.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens.
    pub max_new_tokens: u32,
    /// Beam width. 1 means greedy decoding.
    pub num_beams: u32,
    /// Should the server reuse its key/value cache?
    pub use_cache: bool,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            num_beams: 1,
            use_cache: false,
            temperature: 0.0,
        }
    }
}

/// Model-related command-line options.
#[derive(Args, Clone, Debug)]
pub struct ModelOpts {
    /// The model name to request from the server. Defaults to the preset's
    /// pretrained checkpoint.
    #[clap(long)]
    pub model: Option<String>,

    /// A timeout, in seconds, for each model request. Timed-out requests are
    /// retried a few times before the page falls back.
    #[clap(long)]
    pub timeout: Option<u64>,

    /// An upper limit on the number of tokens to generate per page.
    #[clap(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    pub max_new_tokens: u32,
}

impl ModelOpts {
    /// The model name to request, given the preset's default.
    pub fn model_name(&self, default: &str) -> String {
        self.model.clone().unwrap_or_else(|| default.to_owned())
    }

    /// Our generation settings.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_new_tokens: self.max_new_tokens,
            ..GenerationOptions::default()
        }
    }

    /// Our request timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Token usage reported by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, JsonSchema, Serialize)]
pub struct TokenUsage {
    /// How many tokens were used in the prompt?
    pub prompt_tokens: u64,

    /// How many tokens were generated?
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Was our token usage zero?
    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// The output of a single generation.
#[derive(Clone, Debug)]
pub struct GeneratedSequence {
    /// The generated tokens, special tokens included.
    pub raw: String,

    /// Token usage, if the server reported it.
    pub token_usage: Option<TokenUsage>,
}

/// A model which turns a page image into a token sequence.
#[async_trait]
pub trait VisionModel: fmt::Debug + Send + Sync + 'static {
    /// Generate output for a single page.
    async fn generate(
        &self,
        page: &Page,
        opts: &GenerationOptions,
    ) -> Result<GeneratedSequence>;
}

/// A model which completes a text prompt.
#[async_trait]
pub trait TextModel: fmt::Debug + Send + Sync + 'static {
    /// Complete `prompt`.
    async fn complete(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<GeneratedSequence>;
}

/// Run `future`, giving up after `timeout` if one is set.
pub(crate) async fn with_timeout<T, E>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, ModelError<E>> {
    match timeout {
        Some(timeout) => match time::timeout(timeout, future).await {
            Ok(result) => result.map_err(ModelError::Native),
            Err(_) => Err(ModelError::Timeout(timeout)),
        },
        None => future.await.map_err(ModelError::Native),
    }
}
