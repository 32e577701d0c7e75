//! Per-page inference with fallback, and whole-document runs.

use std::sync::Arc;

use futures::StreamExt as _;
use schemars::JsonSchema;

use crate::{
    async_utils::blocking_iter_streams::BlockingIterStream,
    decode::{OutputKind, decode},
    engines::TextEngine,
    models::{GenerationOptions, TokenUsage, VisionModel},
    page_iter::{Page, PageIter, PageIterOptions},
    prelude::*,
    source::DocumentSource,
    ui::{ProgressConfig, Ui},
};

/// What happened to a single page.
#[derive(Clone, Debug, PartialEq)]
pub enum PageOutcome {
    /// The model produced output.
    Generated {
        /// The raw token sequence.
        raw: String,
        /// Readable text.
        text: String,
        /// Parsed fields, for structured models.
        parsed: Option<Value>,
    },
    /// Generation failed, but the fallback engine recognized the page.
    Fallback {
        /// The engine's display name.
        engine: String,
        /// The recognized text.
        text: String,
        /// Why generation failed.
        generation_error: String,
    },
    /// A text engine recognized the page directly, without any model.
    Recognized {
        /// The engine's display name.
        engine: String,
        /// The recognized text.
        text: String,
    },
    /// Nothing worked.
    Failed {
        /// Every error we saw, in order.
        errors: Vec<String>,
    },
}

impl PageOutcome {
    /// Did this page produce any output?
    pub fn produced_text(&self) -> bool {
        !matches!(self, PageOutcome::Failed { .. })
    }
}

/// The result of processing one page.
#[derive(Clone, Debug)]
pub struct PageReport {
    /// 1-based page number.
    pub page_number: usize,
    /// Number of pages we will process in this document.
    pub page_count: usize,
    /// What happened.
    pub outcome: PageOutcome,
    /// Model token usage, when known.
    pub token_usage: Option<TokenUsage>,
}

/// Something which turns a page into a [`PageReport`]. This never fails:
/// errors are recorded in the report.
#[async_trait]
pub trait PageProcessor: Send + Sync + 'static {
    /// Process page `page_number` of `page_count`.
    async fn run_page(
        &self,
        page_number: usize,
        page_count: usize,
        page: Page,
    ) -> PageReport;
}

/// Generate output for each page with a model, falling back to a text engine
/// if generation fails.
#[derive(Debug, Clone)]
pub struct PagePipeline {
    /// The model to run.
    pub model: Arc<dyn VisionModel>,
    /// How to decode the model's output.
    pub output_kind: OutputKind,
    /// Decoding settings.
    pub generation: GenerationOptions,
    /// What to do when generation fails.
    pub fallback: Option<Arc<dyn TextEngine>>,
}

#[async_trait]
impl PageProcessor for PagePipeline {
    #[instrument(level = "debug", skip_all, fields(page = page_number))]
    async fn run_page(
        &self,
        page_number: usize,
        page_count: usize,
        page: Page,
    ) -> PageReport {
        let report = |outcome, token_usage| PageReport {
            page_number,
            page_count,
            outcome,
            token_usage,
        };

        let generation_error = match self.model.generate(&page, &self.generation).await {
            Ok(generated) => {
                let decoded = decode(self.output_kind, &generated.raw);
                let outcome = PageOutcome::Generated {
                    raw: generated.raw,
                    text: decoded.text,
                    parsed: decoded.parsed,
                };
                return report(outcome, generated.token_usage);
            }
            Err(err) => format!("{err:#}"),
        };
        warn!(page = page_number, "generation failed: {generation_error}");

        let Some(engine) = &self.fallback else {
            let errors = vec![generation_error];
            return report(PageOutcome::Failed { errors }, None);
        };
        match engine.recognize(&page).await {
            Ok(text) => report(
                PageOutcome::Fallback {
                    engine: engine.name().to_owned(),
                    text,
                    generation_error,
                },
                None,
            ),
            Err(err) => {
                let err = err.context(format!("{} fallback failed", engine.name()));
                let errors = vec![generation_error, format!("{err:#}")];
                report(PageOutcome::Failed { errors }, None)
            }
        }
    }
}

/// Recognize each page with a text engine alone.
#[derive(Debug, Clone)]
pub struct EnginePipeline {
    /// The engine to run.
    pub engine: Arc<dyn TextEngine>,
}

#[async_trait]
impl PageProcessor for EnginePipeline {
    #[instrument(level = "debug", skip_all, fields(page = page_number))]
    async fn run_page(
        &self,
        page_number: usize,
        page_count: usize,
        page: Page,
    ) -> PageReport {
        let outcome = match self.engine.recognize(&page).await {
            Ok(text) => PageOutcome::Recognized {
                engine: self.engine.name().to_owned(),
                text,
            },
            Err(err) => PageOutcome::Failed {
                errors: vec![format!("{err:#}")],
            },
        };
        PageReport {
            page_number,
            page_count,
            outcome,
            token_usage: None,
        }
    }
}

/// Overall status of a document.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page produced output.
    Ok,
    /// Some pages produced output, or the document was truncated.
    Incomplete,
    /// No page produced output, or the document could not be loaded.
    Failed,
}

impl DocumentStatus {
    /// Compute a status from page counts.
    fn from_counts(page_count: usize, succeeded: usize, truncated: bool) -> Self {
        if succeeded == 0 {
            DocumentStatus::Failed
        } else if succeeded == page_count && !truncated {
            DocumentStatus::Ok
        } else {
            DocumentStatus::Incomplete
        }
    }
}

/// What happened to a whole document.
#[derive(Clone, Debug)]
pub struct DocumentSummary {
    /// The document, as given on the command line.
    pub source: String,
    /// Overall status.
    pub status: DocumentStatus,
    /// How many pages we processed.
    pub page_count: usize,
    /// Document-level errors, like load failures.
    pub errors: Vec<String>,
    /// Non-fatal problems, like truncation by `--max-pages`.
    pub warnings: Vec<String>,
    /// Total model token usage.
    pub token_usage: Option<TokenUsage>,
}

impl DocumentSummary {
    /// A document we couldn't load at all.
    fn load_failed(source: &DocumentSource, err: anyhow::Error) -> Self {
        Self {
            source: source.to_string(),
            status: DocumentStatus::Failed,
            page_count: 0,
            errors: vec![format!("{err:#}")],
            warnings: vec![],
            token_usage: None,
        }
    }
}

/// Where [`run_document`] sends its results as they become available.
#[async_trait]
pub trait PageSink: Send {
    /// A document is about to be processed.
    async fn start_document(
        &mut self,
        source: &DocumentSource,
        page_count: usize,
    ) -> Result<()>;

    /// A page has been processed. Pages arrive in order.
    async fn page(&mut self, source: &DocumentSource, report: &PageReport) -> Result<()>;

    /// A document is done, successfully or not.
    async fn finish_document(&mut self, summary: &DocumentSummary) -> Result<()>;
}

/// Options for [`run_document`].
#[derive(Clone, Debug, Default)]
pub struct DocumentRunOptions {
    /// How to split the document into pages.
    pub page_iter: PageIterOptions,
    /// Password for encrypted PDFs.
    pub password: Option<String>,
    /// How many pages to process at once.
    pub jobs: usize,
}

/// Process every page of `source`, streaming results to `sink`.
///
/// Load failures are reported in the returned summary. Only errors from `sink`
/// are returned as `Err`.
#[instrument(level = "debug", skip_all, fields(source = %source))]
pub async fn run_document(
    ui: &Ui,
    processor: Arc<dyn PageProcessor>,
    source: &DocumentSource,
    opts: &DocumentRunOptions,
    sink: &mut dyn PageSink,
) -> Result<DocumentSummary> {
    let local = match source.materialize().await {
        Ok(local) => local,
        Err(err) => return Ok(DocumentSummary::load_failed(source, err)),
    };
    let pages = match PageIter::from_path(
        &local.path,
        &opts.page_iter,
        opts.password.as_deref(),
    )
    .await
    {
        Ok(pages) => pages,
        Err(err) => return Ok(DocumentSummary::load_failed(source, err)),
    };

    let page_count = pages.page_count();
    let mut warnings = pages.warnings().to_vec();
    if let Err(err) = pages.check_complete() {
        warn!("{err}");
        warnings.push(err.to_string());
    }
    let truncated = pages.is_incomplete();
    sink.start_document(source, page_count).await?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Processing pages",
            done_msg: "Processed pages",
        },
        page_count as u64,
    );

    let mut reports = BlockingIterStream::new(pages)
        .enumerate()
        .map(|(idx, page)| {
            let processor = processor.clone();
            async move {
                let page_number = idx + 1;
                match page {
                    Ok(page) => processor.run_page(page_number, page_count, page).await,
                    Err(err) => PageReport {
                        page_number,
                        page_count,
                        outcome: PageOutcome::Failed {
                            errors: vec![format!("{err:#}")],
                        },
                        token_usage: None,
                    },
                }
            }
        })
        .buffered(opts.jobs.max(1));

    let mut succeeded = 0;
    let mut token_usage: Option<TokenUsage> = None;
    while let Some(report) = reports.next().await {
        if report.outcome.produced_text() {
            succeeded += 1;
        }
        if let Some(usage) = &report.token_usage {
            *token_usage.get_or_insert_with(TokenUsage::default) += usage.clone();
        }
        sink.page(source, &report).await?;
        pb.inc(1);
    }
    pb.finish_using_style();

    let status = DocumentStatus::from_counts(page_count, succeeded, truncated);
    Ok(DocumentSummary {
        source: source.to_string(),
        status,
        page_count,
        errors: vec![],
        warnings,
        token_usage,
    })
}

/// Process each source in turn, collecting summaries.
pub async fn run_documents(
    ui: &Ui,
    processor: Arc<dyn PageProcessor>,
    sources: &[DocumentSource],
    opts: &DocumentRunOptions,
    sink: &mut dyn PageSink,
) -> Result<Vec<DocumentSummary>> {
    let mut summaries = Vec::with_capacity(sources.len());
    for source in sources {
        let summary = run_document(ui, processor.clone(), source, opts, sink).await?;
        if summary.status == DocumentStatus::Failed {
            warn!(%source, "document failed");
        }
        sink.finish_document(&summary).await?;
        summaries.push(summary);
    }
    Ok(summaries)
}
