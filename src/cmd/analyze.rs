//! The `analyze` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    analysis::{
        AnalysisPrompt, Analyzer, DEFAULT_ANALYSIS_MODEL, default_analysis_prompt,
    },
    async_utils::io::read_json_or_toml,
    engines::TesseractEngine,
    models::{ModelOpts, openai::OpenAiModel},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::DocumentOpts;

/// Options for `analyze`.
#[derive(Debug, Args)]
pub struct AnalyzeOpts {
    #[clap(flatten)]
    pub doc_opts: DocumentOpts,

    #[clap(flatten)]
    pub model_opts: ModelOpts,

    /// A known category. The model is asked to prefer these. May be repeated.
    #[clap(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<String>,

    /// A prompt template in TOML or JSON, with a `template` field.
    #[clap(long = "prompt")]
    pub prompt_path: Option<PathBuf>,

    /// Tesseract language for images and scanned PDFs.
    #[clap(long, default_value = "eng")]
    pub lang: String,
}

/// The `analyze` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_analyze(ui: Ui, opts: &AnalyzeOpts) -> Result<()> {
    let prompt = match &opts.prompt_path {
        Some(path) => read_json_or_toml::<AnalysisPrompt>(path).await?,
        None => default_analysis_prompt(),
    };
    let model = OpenAiModel::new(
        opts.model_opts.model_name(DEFAULT_ANALYSIS_MODEL),
        None,
        opts.model_opts.timeout(),
    )?;
    let doc_opts = &opts.doc_opts;
    let analyzer = Analyzer {
        model: Arc::new(model),
        prompt,
        categories: opts.categories.clone(),
        generation: opts.model_opts.generation_options(),
        ocr: Arc::new(TesseractEngine::new(&opts.lang)),
        page_iter: doc_opts.page_iter.clone(),
        password: doc_opts.password.clone(),
    };

    let sources = doc_opts.sources();
    let mut reporter = doc_opts.reporter(sources.len()).await?;
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔎",
            msg: "Analyzing documents",
            done_msg: "Analyzed documents",
        },
        sources.len() as u64,
    );
    for source in &sources {
        let record = analyzer.analyze(source).await;
        reporter
            .write_record(source, &record, &record.to_text(), record.status)
            .await?;
        pb.inc(1);
    }
    pb.finish_using_style();
    reporter.finish(&ui, doc_opts.allowed_failure_rate).await
}
