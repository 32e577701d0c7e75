//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    page_iter::PageIterOptions,
    pipeline::{DocumentRunOptions, PageProcessor, run_documents},
    prelude::*,
    report::{OutputFormat, Reporter},
    source::DocumentSource,
    ui::Ui,
};

pub mod analyze;
pub mod classify;
pub mod ocr;
pub mod schema;
pub mod transcribe;

/// Options shared by every subcommand that reads documents.
#[derive(Debug, Clone, Args)]
pub struct DocumentOpts {
    /// Documents to process, as local paths or http(s) URLs. Images, TIFFs and
    /// PDFs are supported.
    #[clap(value_name = "SOURCE", required = true)]
    pub sources: Vec<String>,

    #[clap(flatten)]
    pub page_iter: PageIterOptions,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,

    /// Max number of pages to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "1")]
    pub job_count: usize,

    /// Output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,

    /// Write output here instead of standard output.
    #[clap(short = 'o', long = "output")]
    pub output_path: Option<PathBuf>,

    /// What portion of documents should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,
}

impl DocumentOpts {
    /// Our sources, classified as paths or URLs.
    pub fn sources(&self) -> Vec<DocumentSource> {
        self.sources.iter().map(|s| DocumentSource::parse(s)).collect()
    }

    /// Options for each document run.
    pub fn run_options(&self) -> DocumentRunOptions {
        DocumentRunOptions {
            page_iter: self.page_iter.clone(),
            password: self.password.clone(),
            jobs: self.job_count,
        }
    }

    /// Create a reporter for `source_count` documents.
    pub async fn reporter(&self, source_count: usize) -> Result<Reporter> {
        Reporter::new(self.format, self.output_path.as_deref(), source_count).await
    }
}

/// Run every page of every document through `processor`, and report.
pub async fn process_documents(
    ui: &Ui,
    doc_opts: &DocumentOpts,
    processor: Arc<dyn PageProcessor>,
) -> Result<()> {
    let sources = doc_opts.sources();
    let mut reporter = doc_opts.reporter(sources.len()).await?;
    run_documents(
        ui,
        processor,
        &sources,
        &doc_opts.run_options(),
        &mut reporter,
    )
    .await?;
    reporter.finish(ui, doc_opts.allowed_failure_rate).await
}
