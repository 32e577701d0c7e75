//! Document classification and summaries, using a text model.
//!
//! We first get plain text out of the document (a PDF's text layer, OCR or
//! the file itself), then ask a model to classify and summarize it.

use std::sync::{Arc, LazyLock};

use futures::StreamExt as _;
use handlebars::Handlebars;
use regex::Regex;
use schemars::JsonSchema;
use serde_json::json;

use crate::{
    async_utils::blocking_iter_streams::BlockingIterStream,
    engines::{NO_TEXT_FOUND, PdfTextLayer, TextEngine},
    models::{GenerationOptions, TextModel, TokenUsage},
    page_iter::{PDF_MIME_TYPE, PageIter, PageIterOptions, get_mime_type},
    pipeline::DocumentStatus,
    prelude::*,
    source::DocumentSource,
};

/// Our default analysis prompt.
const DEFAULT_ANALYSIS_PROMPT: &str = include_str!("analysis/default_prompt.toml");

/// The model we ask by default.
pub const DEFAULT_ANALYSIS_MODEL: &str = "llama3.2:3b";

/// PDF text layers shorter than this are assumed to be scans.
const MIN_TEXT_LAYER_LEN: usize = 10;

/// Runs of whitespace.
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("failed to compile regex"));

/// A leading code fence, or a stray `.json`.
static LEADING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(```json|```|\.json)").expect("failed to compile regex")
});

/// An analysis prompt template.
#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisPrompt {
    /// A Handlebars template, rendered with `text` and `categories`.
    pub template: String,
}

impl AnalysisPrompt {
    /// Render our template.
    pub fn render(&self, text: &str, categories: &[String]) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        let bindings = json!({
            "text": text,
            "categories": categories.join(", "),
        });
        handlebars
            .render_template(&self.template, &bindings)
            .context("failed to render analysis prompt")
    }
}

/// Get our default analysis prompt.
pub fn default_analysis_prompt() -> AnalysisPrompt {
    toml::from_str::<AnalysisPrompt>(DEFAULT_ANALYSIS_PROMPT)
        .expect("failed to parse built-in analysis prompt")
}

/// Where did our text come from?
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOrigin {
    /// A PDF's embedded text layer.
    TextLayer,
    /// OCR of page images.
    Ocr,
    /// A plain text file.
    PlainText,
}

/// Text extracted from a document.
#[derive(Clone, Debug)]
pub struct ExtractedText {
    /// The text itself.
    pub text: String,
    /// Where it came from.
    pub origin: TextOrigin,
}

/// Lowercase `text` and collapse whitespace, the way we index documents.
pub fn normalize_for_index(text: &str) -> String {
    WHITESPACE
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_owned()
}

/// The fields we want back from the model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedAnalysis {
    /// The document's category.
    pub classification: Option<String>,
    /// A short summary.
    pub summary: Option<String>,
}

/// Interpret a model's response. Models are sloppy about JSON, so we strip
/// code fences and surrounding chatter. If we still can't parse anything,
/// the whole response becomes the summary.
pub fn parse_analysis_response(raw: &str) -> ParsedAnalysis {
    match try_parse_analysis_response(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("could not parse analysis response as JSON: {err:?}");
            ParsedAnalysis {
                classification: None,
                summary: Some(raw.to_owned()),
            }
        }
    }
}

fn try_parse_analysis_response(raw: &str) -> Result<ParsedAnalysis> {
    let cleaned = LEADING_FENCE.replace(raw.trim(), "");
    let cleaned = cleaned.trim();
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    // Some models wrap their whole answer in a JSON string.
    let unwrapped = serde_json::from_str::<Value>(cleaned)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned));
    let mut cleaned = unwrapped.as_deref().unwrap_or(cleaned).trim();

    if let (Some(first), Some(last)) = (cleaned.find('{'), cleaned.rfind('}'))
        && last > first
    {
        cleaned = &cleaned[first..=last];
    }
    let parsed =
        serde_json::from_str::<Value>(cleaned).context("response is not JSON")?;
    if !parsed.is_object() {
        // Valid JSON, just not the shape we asked for.
        return Ok(ParsedAnalysis::default());
    }
    Ok(ParsedAnalysis {
        classification: field_text(&parsed, "classification", "Classification"),
        summary: field_text(&parsed, "summary", "Summary"),
    })
}

/// Read a field under either spelling, as trimmed non-empty text.
fn field_text(value: &Value, name: &str, alt_name: &str) -> Option<String> {
    let field = [name, alt_name]
        .iter()
        .filter_map(|key| value.get(key))
        .find(|v| is_truthy(v))?;
    let text = match field {
        Value::String(s) => s.trim().to_owned(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Is this a value we'd accept as present?
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Output record for an analyzed document.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct AnalysisRecord {
    /// The document, as given on the command line.
    pub source: String,

    /// Did we get an analysis?
    pub status: DocumentStatus,

    /// Where the analyzed text came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_origin: Option<TextOrigin>,

    /// The document's category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,

    /// A short summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// The model's raw response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    /// How many tokens did we use?
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Any errors that occurred.
    pub errors: Vec<String>,
}

impl AnalysisRecord {
    /// Render as console text.
    pub fn to_text(&self) -> String {
        if !self.errors.is_empty() {
            return format!("→ Failed: {}\n", self.errors.join("\n  "));
        }
        let none = "(none)";
        format!(
            "→ Classification: {}\n→ Summary: {}\n",
            self.classification.as_deref().unwrap_or(none),
            self.summary.as_deref().unwrap_or(none),
        )
    }
}

/// Classifies and summarizes documents.
#[derive(Debug)]
pub struct Analyzer {
    /// The model to ask.
    pub model: Arc<dyn TextModel>,
    /// Our prompt.
    pub prompt: AnalysisPrompt,
    /// Known categories to suggest.
    pub categories: Vec<String>,
    /// Decoding settings.
    pub generation: GenerationOptions,
    /// OCR engine for images and scanned PDFs.
    pub ocr: Arc<dyn TextEngine>,
    /// How to rasterize scanned PDFs.
    pub page_iter: PageIterOptions,
    /// Password for encrypted PDFs.
    pub password: Option<String>,
}

impl Analyzer {
    /// Analyze a document. Errors are recorded in the output.
    #[instrument(level = "debug", skip_all, fields(source = %source))]
    pub async fn analyze(&self, source: &DocumentSource) -> AnalysisRecord {
        let mut record = AnalysisRecord {
            source: source.to_string(),
            status: DocumentStatus::Failed,
            text_origin: None,
            classification: None,
            summary: None,
            raw: None,
            token_usage: None,
            errors: vec![],
        };
        if let Err(err) = self.analyze_into(source, &mut record).await {
            record.errors.push(format!("{err:#}"));
        }
        record
    }

    async fn analyze_into(
        &self,
        source: &DocumentSource,
        record: &mut AnalysisRecord,
    ) -> Result<()> {
        let extracted = self.extract_text(source).await?;
        record.text_origin = Some(extracted.origin);

        let text = normalize_for_index(&extracted.text);
        if text.is_empty() {
            return Err(anyhow!("No text to analyze"));
        }
        let prompt = self.prompt.render(&text, &self.categories)?;
        let generated = self.model.complete(&prompt, &self.generation).await?;
        let parsed = parse_analysis_response(&generated.raw);

        record.status = DocumentStatus::Ok;
        record.classification = parsed.classification;
        record.summary = parsed.summary;
        record.raw = Some(generated.raw);
        record.token_usage = generated.token_usage;
        Ok(())
    }

    /// Get plain text out of a document.
    pub async fn extract_text(&self, source: &DocumentSource) -> Result<ExtractedText> {
        let local = source.materialize().await?;
        let mime_type = get_mime_type(&local.path)?;

        if mime_type == "text/plain" {
            let text = tokio::fs::read_to_string(&local.path)
                .await
                .with_context(|| format!("failed to read {}", local.path.display()))?;
            return Ok(ExtractedText {
                text,
                origin: TextOrigin::PlainText,
            });
        }

        if mime_type == PDF_MIME_TYPE {
            let layer = PdfTextLayer {
                password: self.password.clone(),
            };
            match layer.extract(&local.path).await {
                Ok(text) if text.trim().len() > MIN_TEXT_LAYER_LEN => {
                    return Ok(ExtractedText {
                        text,
                        origin: TextOrigin::TextLayer,
                    });
                }
                Ok(_) => debug!("PDF has no usable text layer, using OCR"),
                Err(err) => warn!("cannot read PDF text layer, using OCR: {err:?}"),
            }
        }

        let pages =
            PageIter::from_path(&local.path, &self.page_iter, self.password.as_deref())
                .await?;
        let mut texts = Vec::with_capacity(pages.page_count());
        let mut pages = BlockingIterStream::new(pages);
        while let Some(page) = pages.next().await {
            let text = self.ocr.recognize(&page?).await?;
            if !text.is_empty() {
                texts.push(text);
            }
        }
        let text = if texts.is_empty() {
            NO_TEXT_FOUND.to_owned()
        } else {
            texts.join("\n\n")
        };
        Ok(ExtractedText {
            text,
            origin: TextOrigin::Ocr,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::models::GeneratedSequence;

    use super::*;

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(
            normalize_for_index("  Hello\n\tWORLD  again "),
            "hello world again"
        );
        assert_eq!(normalize_for_index(" \n "), "");
    }

    #[test]
    fn parses_fenced_json() {
        let parsed = parse_analysis_response(
            "```json\n{\"classification\": \" Invoice \", \"summary\": \"A bill.\"}\n```",
        );
        assert_eq!(parsed.classification.as_deref(), Some("Invoice"));
        assert_eq!(parsed.summary.as_deref(), Some("A bill."));
    }

    #[test]
    fn parses_json_surrounded_by_chatter() {
        let parsed = parse_analysis_response(
            "Sure! Here you go: {\"Classification\": \"Letter\", \"Summary\": \"\"} Hope this helps.",
        );
        assert_eq!(parsed.classification.as_deref(), Some("Letter"));
        assert_eq!(parsed.summary, None);
    }

    #[test]
    fn parses_doubly_encoded_json() {
        let parsed =
            parse_analysis_response(r#""{\"classification\":\"memo\",\"summary\":\"hi\"}""#);
        assert_eq!(parsed.classification.as_deref(), Some("memo"));
        assert_eq!(parsed.summary.as_deref(), Some("hi"));
    }

    #[test]
    fn unparseable_responses_become_the_summary() {
        let raw = "I think this is a receipt.";
        assert_eq!(
            parse_analysis_response(raw),
            ParsedAnalysis {
                classification: None,
                summary: Some(raw.to_owned()),
            }
        );
    }

    #[test]
    fn json_which_is_not_an_object_has_no_fields() {
        for raw in ["42", "[1, 2]", "null", "```json\ntrue\n```"] {
            assert_eq!(parse_analysis_response(raw), ParsedAnalysis::default(), "{raw}");
        }
    }

    #[test]
    fn default_prompt_mentions_categories_only_when_given() -> Result<()> {
        let prompt = default_analysis_prompt();
        let without = prompt.render("some <text> & more", &[])?;
        assert!(without.contains("some <text> & more"));
        assert!(!without.contains("Possible categories"));
        assert!(without.contains("Respond in JSON with keys: classification, summary."));

        let with = prompt.render("x", &["invoice".to_owned(), "letter".to_owned()])?;
        assert!(with.contains("Possible categories: invoice, letter"));
        assert!(with.contains("Use an existing category if it fits."));
        Ok(())
    }

    #[derive(Debug)]
    struct EchoModel;

    #[async_trait]
    impl TextModel for EchoModel {
        async fn complete(
            &self,
            prompt: &str,
            _opts: &GenerationOptions,
        ) -> Result<GeneratedSequence> {
            let summary = if prompt.contains("quarterly report") {
                "about a report"
            } else {
                "something else"
            };
            Ok(GeneratedSequence {
                raw: format!(r#"{{"classification": "report", "summary": "{summary}"}}"#),
                token_usage: None,
            })
        }
    }

    #[derive(Debug)]
    struct NoOcr;

    #[async_trait]
    impl TextEngine for NoOcr {
        fn name(&self) -> &str {
            "None"
        }

        async fn recognize(&self, _page: &crate::page_iter::Page) -> Result<String> {
            Err(anyhow!("no OCR in tests"))
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer {
            model: Arc::new(EchoModel),
            prompt: default_analysis_prompt(),
            categories: vec![],
            generation: GenerationOptions::default(),
            ocr: Arc::new(NoOcr),
            page_iter: PageIterOptions::default(),
            password: None,
        }
    }

    #[tokio::test]
    async fn analyzes_plain_text_files() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("analysis-test")?;
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, "The Quarterly   Report\nfor Q3").await?;

        let record = analyzer().analyze(&DocumentSource::Path(path)).await;
        assert_eq!(record.status, DocumentStatus::Ok);
        assert_eq!(record.text_origin, Some(TextOrigin::PlainText));
        assert_eq!(record.classification.as_deref(), Some("report"));
        assert_eq!(record.summary.as_deref(), Some("about a report"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_documents_have_no_text_to_analyze() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("analysis-test")?;
        let path = dir.path().join("empty.txt");
        tokio::fs::write(&path, "  \n ").await?;

        let record = analyzer().analyze(&DocumentSource::Path(path)).await;
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.errors[0].contains("No text to analyze"));
        Ok(())
    }
}
