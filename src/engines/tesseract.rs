//! Tesseract OCR engine.

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_error},
    cpu_limit::with_cpu_semaphore,
    page_iter::Page,
    prelude::*,
};

use super::TextEngine;

/// Engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractEngine {
    /// The `tesseract` executable.
    pub program: String,
    /// Language data to use, like `eng` or `eng+deu`.
    pub lang: String,
    /// Page segmentation mode.
    pub psm: Option<u8>,
    /// OCR engine mode.
    pub oem: Option<u8>,
    /// Only recognize these characters.
    pub whitelist: Option<String>,
}

impl TesseractEngine {
    /// Create an engine with Tesseract's default layout analysis.
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            program: "tesseract".to_owned(),
            lang: lang.into(),
            psm: None,
            oem: None,
            whitelist: None,
        }
    }

    /// Command-line arguments, not counting input and output.
    fn args(&self) -> Vec<String> {
        let mut args = vec!["-l".to_owned(), self.lang.clone()];
        if let Some(psm) = self.psm {
            args.extend(["--psm".to_owned(), psm.to_string()]);
        }
        if let Some(oem) = self.oem {
            args.extend(["--oem".to_owned(), oem.to_string()]);
        }
        if let Some(whitelist) = &self.whitelist {
            args.extend([
                "-c".to_owned(),
                format!("tessedit_char_whitelist={whitelist}"),
            ]);
        }
        args
    }
}

#[async_trait]
impl TextEngine for TesseractEngine {
    fn name(&self) -> &str {
        "Tesseract"
    }

    #[instrument(level = "debug", skip_all, fields(lang = %self.lang, psm = ?self.psm))]
    async fn recognize(&self, page: &Page) -> Result<String> {
        // Tesseract wants a file with a recognizable extension.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir
            .path()
            .join(format!("page.{}", page.file_extension()?));
        tokio::fs::write(&input_path, &page.data)
            .await
            .context("cannot write tesseract input file")?;

        let output = with_cpu_semaphore(|| async {
            Command::new(&self.program)
                .arg(&input_path)
                .arg("stdout")
                .args(self.args())
                .output()
                .await
                .map_err(|err| spawn_error(&self.program, err))
        })
        .await?;
        check_for_command_failure(&self.program, &output, None)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbImage};

    use super::*;

    #[test]
    fn args_include_configured_options() {
        let engine = TesseractEngine {
            program: "tesseract".to_owned(),
            lang: "deu".to_owned(),
            psm: Some(7),
            oem: Some(1),
            whitelist: Some("abc".to_owned()),
        };
        assert_eq!(
            engine.args(),
            [
                "-l",
                "deu",
                "--psm",
                "7",
                "--oem",
                "1",
                "-c",
                "tessedit_char_whitelist=abc"
            ]
        );
        assert_eq!(TesseractEngine::new("eng").args(), ["-l", "eng"]);
    }

    #[tokio::test]
    #[ignore = "needs tesseract"]
    async fn blank_page_has_no_text() -> Result<()> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, [255; 3].into()));
        let text = TesseractEngine::new("eng")
            .recognize(&Page::from_image(&image)?)
            .await?;
        assert_eq!(text, "");
        Ok(())
    }
}
