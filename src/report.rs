//! Writing results, as console text or JSON Lines.

use clap::ValueEnum;
use schemars::JsonSchema;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use crate::{
    async_utils::io::create_writer,
    models::TokenUsage,
    pipeline::{DocumentStatus, DocumentSummary, PageOutcome, PageReport, PageSink},
    prelude::*,
    source::DocumentSource,
    ui::Ui,
};

/// How should we format our output?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON record per line.
    Jsonl,
}

/// How a page was handled.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// The model produced output.
    Generated,
    /// The model failed, and the fallback engine produced output.
    Fallback,
    /// A text engine produced output without a model.
    Recognized,
    /// Nothing worked.
    Failed,
}

/// Output record for a single page.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct PageRecord {
    /// The document, as given on the command line.
    pub source: String,

    /// 1-based page number.
    pub page: usize,

    /// Number of pages processed in this document.
    pub page_count: usize,

    /// How was this page handled?
    pub status: PageStatus,

    /// The model's raw output, special tokens included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    /// Readable text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Structured fields parsed from the model's output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,

    /// The text engine which produced `text`, if it wasn't the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    /// How many tokens did we use?
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Any errors that occurred, including model errors that were recovered
    /// by a fallback engine.
    pub errors: Vec<String>,
}

impl PageRecord {
    /// Build a record from a pipeline report.
    pub fn new(source: &DocumentSource, report: &PageReport) -> Self {
        let mut record = Self {
            source: source.to_string(),
            page: report.page_number,
            page_count: report.page_count,
            status: PageStatus::Failed,
            raw: None,
            text: None,
            parsed: None,
            engine: None,
            token_usage: report.token_usage.clone(),
            errors: vec![],
        };
        match &report.outcome {
            PageOutcome::Generated { raw, text, parsed } => {
                record.status = PageStatus::Generated;
                record.raw = Some(raw.clone());
                record.text = Some(text.clone());
                record.parsed = parsed.clone();
            }
            PageOutcome::Fallback {
                engine,
                text,
                generation_error,
            } => {
                record.status = PageStatus::Fallback;
                record.engine = Some(engine.clone());
                record.text = Some(text.clone());
                record.errors.push(generation_error.clone());
            }
            PageOutcome::Recognized { engine, text } => {
                record.status = PageStatus::Recognized;
                record.engine = Some(engine.clone());
                record.text = Some(text.clone());
            }
            PageOutcome::Failed { errors } => {
                record.errors = errors.clone();
            }
        }
        record
    }
}

/// Output record for a whole document, written after its pages.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct DocumentRecord {
    /// The document, as given on the command line.
    pub source: String,

    /// Did every page produce output?
    pub status: DocumentStatus,

    /// Number of pages processed.
    pub page_count: usize,

    /// How many tokens did we use?
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Document-level errors, like download or rasterization failures.
    pub errors: Vec<String>,

    /// Non-fatal problems, like truncation by `--max-pages`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<&DocumentSummary> for DocumentRecord {
    fn from(summary: &DocumentSummary) -> Self {
        Self {
            source: summary.source.clone(),
            status: summary.status,
            page_count: summary.page_count,
            token_usage: summary.token_usage.clone(),
            errors: summary.errors.clone(),
            warnings: summary.warnings.clone(),
        }
    }
}

/// JSON Lines records are tagged with their type.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonlRecord<'a, T: Serialize> {
    Page(&'a PageRecord),
    Document(&'a DocumentRecord),
    Analysis(&'a T),
}

/// Render the text banner for a page, and its content.
pub fn render_page_text(report: &PageReport) -> String {
    let mut out = format!(
        "\n--- Page {}/{} ---\n",
        report.page_number, report.page_count
    );
    match &report.outcome {
        PageOutcome::Generated {
            raw,
            parsed: Some(parsed),
            ..
        } => {
            out.push_str(&format!("→ Raw: {raw}\n"));
            out.push_str(&format!("→ Parsed JSON/text: {parsed}\n"));
        }
        PageOutcome::Generated {
            text, parsed: None, ..
        }
        | PageOutcome::Recognized { text, .. } => {
            out.push_str(text);
            out.push('\n');
        }
        PageOutcome::Fallback { engine, text, .. } => {
            out.push_str(&format!("→ {engine} fallback: {text}\n"));
        }
        PageOutcome::Failed { errors } => {
            out.push_str(&render_failure(errors));
        }
    }
    out
}

/// Render a list of errors.
fn render_failure(errors: &[String]) -> String {
    format!("→ Failed: {}\n", errors.join("\n  "))
}

/// Counts of what happened during a run.
#[derive(Clone, Debug, Default)]
pub struct RunCounters {
    /// How many documents did we process?
    pub document_count: usize,

    /// How many documents failed entirely?
    pub failure_count: usize,

    /// How many documents were only partly processed?
    pub incomplete_count: usize,

    /// How many tokens did we use?
    pub token_usage: TokenUsage,
}

impl RunCounters {
    /// Count a finished item.
    pub fn update(&mut self, status: DocumentStatus, token_usage: Option<&TokenUsage>) {
        self.document_count += 1;
        match status {
            DocumentStatus::Ok => {}
            DocumentStatus::Incomplete => self.incomplete_count += 1,
            DocumentStatus::Failed => self.failure_count += 1,
        }
        if let Some(token_usage) = token_usage {
            self.token_usage += token_usage.clone();
        }
    }

    /// Report totals, and fail if too many documents failed.
    pub fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        if !self.token_usage.is_zero() {
            ui.display_message(
                "📈",
                &format!(
                    "{} input tokens and {} output tokens used",
                    self.token_usage.prompt_tokens, self.token_usage.completion_tokens,
                ),
            );
        }
        if self.incomplete_count > 0 {
            ui.display_message(
                "⚠️",
                &format!("{} documents were incomplete", self.incomplete_count),
            );
        }
        if self.document_count == 0 {
            return Ok(());
        }
        let failure_rate = self.failure_count as f32 / self.document_count as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of documents failed, but only {:.2}% were allowed",
                self.failure_count,
                self.document_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if self.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!(
                        "{}/{} documents failed",
                        self.failure_count, self.document_count
                    ),
                );
            }
            Ok(())
        }
    }
}

/// Writes results in our chosen format.
pub struct Reporter {
    /// Output format.
    format: OutputFormat,
    /// Where our output goes.
    wtr: Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>,
    /// Should we print a header before each document?
    show_headers: bool,
    /// What happened so far?
    counters: RunCounters,
}

impl Reporter {
    /// Create a reporter writing to `output_path`, or standard output.
    pub async fn new(
        format: OutputFormat,
        output_path: Option<&Path>,
        source_count: usize,
    ) -> Result<Self> {
        Ok(Self::with_writer(
            format,
            create_writer(output_path).await?,
            source_count,
        ))
    }

    /// Create a reporter writing to `wtr`.
    pub fn with_writer(
        format: OutputFormat,
        wtr: Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>,
        source_count: usize,
    ) -> Self {
        Self {
            format,
            wtr,
            show_headers: source_count > 1,
            counters: RunCounters::default(),
        }
    }

    /// Write a record which isn't page-based, like an analysis result. `text`
    /// is used for text output.
    pub async fn write_record<T: Serialize>(
        &mut self,
        source: &DocumentSource,
        record: &T,
        text: &str,
        status: DocumentStatus,
    ) -> Result<()> {
        self.counters.update(status, None);
        match self.format {
            OutputFormat::Text => {
                let mut out = String::new();
                if self.show_headers {
                    out.push_str(&format!("=== {source} ===\n"));
                }
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
                self.write_str(&out).await
            }
            OutputFormat::Jsonl => self.write_jsonl(&JsonlRecord::Analysis(record)).await,
        }
    }

    /// Flush our output and check our failure rate.
    pub async fn finish(mut self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        self.wtr.flush().await.context("failed to flush output")?;
        self.counters.finish(ui, allowed_failure_rate)
    }

    async fn write_jsonl<T: Serialize>(&mut self, record: &JsonlRecord<'_, T>) -> Result<()> {
        let mut line = serde_json::to_string(record).context("failed to serialize output")?;
        line.push('\n');
        self.write_str(&line).await
    }

    async fn write_str(&mut self, s: &str) -> Result<()> {
        self.wtr
            .write_all(s.as_bytes())
            .await
            .context("failed to write output")
    }
}

#[async_trait]
impl PageSink for Reporter {
    async fn start_document(
        &mut self,
        source: &DocumentSource,
        _page_count: usize,
    ) -> Result<()> {
        if self.format == OutputFormat::Text && self.show_headers {
            self.write_str(&format!("=== {source} ===\n")).await?;
        }
        Ok(())
    }

    async fn page(&mut self, source: &DocumentSource, report: &PageReport) -> Result<()> {
        match self.format {
            OutputFormat::Text => self.write_str(&render_page_text(report)).await,
            OutputFormat::Jsonl => {
                let record = PageRecord::new(source, report);
                self.write_jsonl::<()>(&JsonlRecord::Page(&record)).await
            }
        }
    }

    async fn finish_document(&mut self, summary: &DocumentSummary) -> Result<()> {
        self.counters
            .update(summary.status, summary.token_usage.as_ref());
        match self.format {
            OutputFormat::Text => {
                let mut out = String::new();
                if summary.page_count == 0 && !summary.errors.is_empty() {
                    if self.show_headers {
                        out.push_str(&format!("=== {} ===\n", summary.source));
                    }
                    out.push_str(&render_failure(&summary.errors));
                }
                for warning in &summary.warnings {
                    out.push_str(&format!("→ Warning: {warning}\n"));
                }
                self.write_str(&out).await
            }
            OutputFormat::Jsonl => {
                let record = DocumentRecord::from(summary);
                self.write_jsonl::<()>(&JsonlRecord::Document(&record)).await
            }
        }
    }
}
