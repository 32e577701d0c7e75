use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod analysis;
mod async_utils;
mod cmd;
mod cpu_limit;
mod data_url;
mod decode;
mod engines;
mod models;
mod page_iter;
mod pipeline;
mod prelude;
mod preprocess;
mod report;
mod retry;
mod source;
mod ui;

/// Read images and PDFs with pretrained document models, falling back to OCR.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): The model server's OpenAI-compatible
    endpoint. Defaults to a local Ollama at http://localhost:11434/v1.
  - OLLAMA_URL (optional): An Ollama server URL, used when OPENAI_API_BASE
    is not set.
  - OPENAI_API_KEY (optional): An API key for the model server.

  These variables may be set in a standard `.env` file.

External Tools:
  PDFs need `pdfinfo` and `pdftocairo` (poppler-utils), and OCR needs
  `tesseract`.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Classify document pages with Donut (RVL-CDIP).
    Classify(cmd::classify::ClassifyOpts),
    /// Transcribe text lines with TrOCR.
    Transcribe(cmd::transcribe::TranscribeOpts),
    /// Recognize text with Tesseract only.
    Ocr(cmd::ocr::OcrOpts),
    /// Classify and summarize documents with a text model.
    Analyze(cmd::analyze::AnalyzeOpts),
    /// Print JSON Schemas for our output records.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Classify(opts) => opts.doc_opts.output_path.is_none(),
            Cmd::Transcribe(opts) => opts.doc_opts.output_path.is_none(),
            Cmd::Ocr(opts) => opts.doc_opts.output_path.is_none(),
            Cmd::Analyze(opts) => opts.doc_opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Progress bars would mix with our output on a terminal.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Classify(opts) => cmd::classify::cmd_classify(ui, opts).await,
        Cmd::Transcribe(opts) => cmd::transcribe::cmd_transcribe(ui, opts).await,
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(ui, opts).await,
        Cmd::Analyze(opts) => cmd::analyze::cmd_analyze(ui, opts).await,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await,
    }
}
