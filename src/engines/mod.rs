//! Secondary text-recognition engines.
//!
//! These run when a model can't produce output for a page, and also power the
//! `ocr` and `analyze` commands directly.

use std::{fmt, sync::Arc};

use clap::ValueEnum;

use crate::{page_iter::Page, prelude::*};

pub mod handwritten;
pub mod pdftotext;
pub mod tesseract;

pub use self::{
    handwritten::HandwrittenTesseractEngine, pdftotext::PdfTextLayer,
    tesseract::TesseractEngine,
};

/// Text shown when an engine ran but found nothing.
pub const NO_TEXT_FOUND: &str = "No text found";

/// An engine which recognizes the text on a single page.
#[async_trait]
pub trait TextEngine: fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for reports.
    fn name(&self) -> &str;

    /// Recognize the text on `page`.
    async fn recognize(&self, page: &Page) -> Result<String>;
}

/// Which engine should we fall back to when generation fails?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FallbackChoice {
    /// Report the failure and move on.
    #[default]
    None,
    /// Plain Tesseract.
    Tesseract,
    /// Tesseract with handwriting preprocessing and several page layouts.
    Handwritten,
}

impl FallbackChoice {
    /// Build the chosen engine, if any.
    pub fn engine(self, lang: &str) -> Option<Arc<dyn TextEngine>> {
        match self {
            FallbackChoice::None => None,
            FallbackChoice::Tesseract => Some(Arc::new(TesseractEngine::new(lang))),
            FallbackChoice::Handwritten => {
                Some(Arc::new(HandwrittenTesseractEngine::new(lang)))
            }
        }
    }
}

/// Keep the longest text. Ties go to the earliest candidate.
pub fn longest_text(candidates: impl IntoIterator<Item = String>) -> String {
    candidates
        .into_iter()
        .fold(String::new(), |best, candidate| {
            if candidate.chars().count() > best.chars().count() {
                candidate
            } else {
                best
            }
        })
}
