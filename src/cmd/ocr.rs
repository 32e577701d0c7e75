//! The `ocr` subcommand.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{
    engines::{HandwrittenTesseractEngine, TesseractEngine, TextEngine},
    pipeline::EnginePipeline,
    prelude::*,
    ui::Ui,
};

use super::{DocumentOpts, process_documents};

/// How should we run Tesseract?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OcrStrategy {
    /// Tesseract's defaults.
    #[default]
    Plain,
    /// Preprocess for handwriting and try several page layouts.
    Handwritten,
    /// Like `handwritten`, but also try lighter and darker binarization.
    MultiThreshold,
    /// Like `handwritten`, but denoise and gamma-correct at full size.
    Denoised,
}

impl OcrStrategy {
    /// Build an engine for this strategy.
    pub fn engine(self, lang: &str) -> Arc<dyn TextEngine> {
        match self {
            OcrStrategy::Plain => Arc::new(TesseractEngine::new(lang)),
            OcrStrategy::Handwritten => Arc::new(HandwrittenTesseractEngine::new(lang)),
            OcrStrategy::MultiThreshold => {
                Arc::new(HandwrittenTesseractEngine::multi_threshold(lang))
            }
            OcrStrategy::Denoised => Arc::new(HandwrittenTesseractEngine::denoised(lang)),
        }
    }
}

/// Options for `ocr`.
#[derive(Debug, Args)]
pub struct OcrOpts {
    #[clap(flatten)]
    pub doc_opts: DocumentOpts,

    /// Recognition strategy.
    #[clap(long, value_enum, default_value_t = OcrStrategy::default())]
    pub strategy: OcrStrategy,

    /// Tesseract language, like `eng` or `eng+deu`.
    #[clap(long, default_value = "eng")]
    pub lang: String,
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all, fields(strategy = ?opts.strategy))]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let pipeline = EnginePipeline {
        engine: opts.strategy.engine(&opts.lang),
    };
    process_documents(&ui, &opts.doc_opts, Arc::new(pipeline)).await
}
