//! The `transcribe` subcommand.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{
    engines::FallbackChoice,
    models::{ModelOpts, ModelPreset, openai::OpenAiModel},
    pipeline::PagePipeline,
    prelude::*,
    ui::Ui,
};

use super::{DocumentOpts, process_documents};

/// Which TrOCR model should we use?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TextVariant {
    /// Handwritten text.
    Handwritten,
    /// Printed text.
    #[default]
    Printed,
}

impl TextVariant {
    /// The matching model preset.
    pub fn preset(self) -> ModelPreset {
        match self {
            TextVariant::Handwritten => ModelPreset::TrocrHandwritten,
            TextVariant::Printed => ModelPreset::TrocrPrinted,
        }
    }
}

/// Options for `transcribe`.
#[derive(Debug, Args)]
pub struct TranscribeOpts {
    #[clap(flatten)]
    pub doc_opts: DocumentOpts,

    #[clap(flatten)]
    pub model_opts: ModelOpts,

    /// Kind of text to expect.
    #[clap(long, value_enum, default_value_t = TextVariant::default())]
    pub variant: TextVariant,

    /// Engine to use for pages where the model fails.
    #[clap(long, value_enum, default_value_t = FallbackChoice::None)]
    pub fallback: FallbackChoice,

    /// Tesseract language for the fallback engine.
    #[clap(long, default_value = "eng")]
    pub lang: String,
}

/// The `transcribe` subcommand.
#[instrument(level = "debug", skip_all, fields(variant = ?opts.variant))]
pub async fn cmd_transcribe(ui: Ui, opts: &TranscribeOpts) -> Result<()> {
    let preset = opts.variant.preset();
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
