//! Handwriting recognition: preprocess the page, try several Tesseract page
//! layouts, and keep whichever found the most text.

use futures::future::join_all;
use image::DynamicImage;

use crate::{
    async_utils::blocking_iter_streams::spawn_blocking_propagating_panics,
    page_iter::Page,
    preprocess::{PreprocessOptions, preprocess, preprocess_advanced},
    prelude::*,
};

use super::{NO_TEXT_FOUND, TesseractEngine, TextEngine, longest_text};

/// Characters we allow in handwritten text.
const HANDWRITING_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789.,!?;:()[]{}\"'-/@#$%^&*+=<>~`|\\_ ";

/// Page segmentation modes to try: a single block, a single line and a single
/// word.
const PAGE_SEGMENTATION_MODES: &[u8] = &[6, 7, 8];

/// Tesseract's "LSTM only" engine mode.
const OEM_LSTM_ONLY: u8 = 1;

/// Default binarization threshold.
const DEFAULT_THRESHOLD: u8 = 128;

/// Extra thresholds tried by [`HandwrittenTesseractEngine::multi_threshold`].
const EXTRA_THRESHOLDS: &[u8] = &[100, 160];

/// One way of cleaning up a page before recognition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cleanup {
    /// Resize, normalize, sharpen and binarize at this level.
    Standard(u8),
    /// Denoise, enhance and binarize at this level, keeping the page size.
    Advanced(u8),
}

impl Cleanup {
    fn apply(self, image: &DynamicImage) -> Result<Page> {
        let gray = match self {
            Cleanup::Standard(threshold) => {
                preprocess(image, &PreprocessOptions::with_threshold(threshold))
            }
            Cleanup::Advanced(threshold) => {
                preprocess_advanced(image, &PreprocessOptions::with_threshold(threshold))
            }
        };
        Page::from_image(&DynamicImage::ImageLuma8(gray))
    }
}

/// Tesseract tuned for handwriting.
#[derive(Clone, Debug)]
pub struct HandwrittenTesseractEngine {
    /// One engine per page segmentation mode.
    configs: Vec<TesseractEngine>,
    /// Cleanups to try.
    cleanups: Vec<Cleanup>,
    /// Display name.
    name: &'static str,
}

impl HandwrittenTesseractEngine {
    /// Create an engine which binarizes at the default threshold.
    pub fn new(lang: &str) -> Self {
        let configs = PAGE_SEGMENTATION_MODES
            .iter()
            .map(|&psm| TesseractEngine {
                psm: Some(psm),
                oem: Some(OEM_LSTM_ONLY),
                whitelist: Some(HANDWRITING_WHITELIST.to_owned()),
                ..TesseractEngine::new(lang)
            })
            .collect();
        Self {
            configs,
            cleanups: vec![Cleanup::Standard(DEFAULT_THRESHOLD)],
            name: "Tesseract handwriting",
        }
    }

    /// Create an engine which also tries copies binarized at lighter and
    /// darker thresholds.
    pub fn multi_threshold(lang: &str) -> Self {
        let mut engine = Self::new(lang);
        engine
            .cleanups
            .extend(EXTRA_THRESHOLDS.iter().map(|&t| Cleanup::Standard(t)));
        engine.name = "Tesseract handwriting (multi-threshold)";
        engine
    }

    /// Create an engine which denoises and gamma-corrects pages at their
    /// original size instead of resizing them.
    pub fn denoised(lang: &str) -> Self {
        Self {
            cleanups: vec![Cleanup::Advanced(DEFAULT_THRESHOLD)],
            name: "Tesseract handwriting (denoised)",
            ..Self::new(lang)
        }
    }

    /// Run every configuration on an already-preprocessed page.
    async fn recognize_preprocessed(&self, page: &Page) -> Vec<Result<String>> {
        let attempts = self.configs.iter().map(|config| async move {
            let result = config.recognize(page).await;
            if let Err(err) = &result {
                debug!(psm = ?config.psm, "handwriting attempt failed: {err:#}");
            }
            result
        });
        join_all(attempts).await
    }
}

#[async_trait]
impl TextEngine for HandwrittenTesseractEngine {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(level = "debug", skip_all, fields(cleanups = ?self.cleanups))]
    async fn recognize(&self, page: &Page) -> Result<String> {
        let source = page.clone();
        let cleanups = self.cleanups.clone();
        let prepared = spawn_blocking_propagating_panics(move || {
            let image = source.decode()?;
            cleanups
                .into_iter()
                .map(|cleanup| cleanup.apply(&image))
                .collect::<Result<Vec<_>>>()
        })
        .await?;

        let mut candidates = Vec::new();
        let mut first_error = None;
        for page in &prepared {
            for result in self.recognize_preprocessed(page).await {
                match result {
                    Ok(text) => candidates.push(text),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        // Failed attempts only count as empty text if something actually ran.
        if candidates.is_empty()
            && let Some(err) = first_error
        {
            return Err(err);
        }
        let best = longest_text(candidates);
        if best.is_empty() {
            Ok(NO_TEXT_FOUND.to_owned())
        } else {
            Ok(best)
        }
    }
}
