//! The `classify` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    engines::FallbackChoice,
    models::{ModelOpts, ModelPreset, openai::OpenAiModel},
    pipeline::PagePipeline,
    prelude::*,
    ui::Ui,
};

use super::{DocumentOpts, process_documents};

/// Options for `classify`.
#[derive(Debug, Args)]
pub struct ClassifyOpts {
    #[clap(flatten)]
    pub doc_opts: DocumentOpts,

    #[clap(flatten)]
    pub model_opts: ModelOpts,

    /// Engine to use for pages where the model fails.
    #[clap(long, value_enum, default_value_t = FallbackChoice::Tesseract)]
    pub fallback: FallbackChoice,

    /// Tesseract language for the fallback engine.
    #[clap(long, default_value = "eng")]
    pub lang: String,
}

/// The `classify` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_classify(ui: Ui, opts: &ClassifyOpts) -> Result<()> {
    let preset = ModelPreset::DonutRvlcdip;
    let model = OpenAiModel::new(
        opts.model_opts.model_name(preset.checkpoint()),
        preset.task_prompt(),
        opts.model_opts.timeout(),
    )?;
    let pipeline = PagePipeline {
        model: Arc::new(model),
        output_kind: preset.output_kind(),
        generation: opts.model_opts.generation_options(),
        fallback: opts.fallback.engine(&opts.lang),
    };
    process_documents(&ui, &opts.doc_opts, Arc::new(pipeline)).await
}
