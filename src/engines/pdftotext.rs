//! Embedded PDF text layers, via `pdftotext`.

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_error},
    prelude::*,
};

/// Extracts the text layer of a PDF using `pdftotext` from `poppler-utils`.
///
/// This misses any text that only exists as pixels, but when a PDF has a
/// real text layer it is fast and exact.
#[derive(Clone, Debug, Default)]
pub struct PdfTextLayer {
    /// Password for encrypted PDFs.
    pub password: Option<String>,
}

impl PdfTextLayer {
    /// Extract the text of every page, preserving physical layout.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn extract(&self, path: &Path) -> Result<String> {
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-layout");
        if let Some(password) = &self.password {
            cmd.arg("-opw").arg(password);
        }
        let output = cmd
            .arg(path)
            .arg("-")
            .output()
            .await
            .map_err(|err| spawn_error("pdftotext", err))?;
        check_for_command_failure("pdftotext", &output, None)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "needs poppler-utils"]
    async fn extracts_text_layer() -> Result<()> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/two_pages.pdf");
        let text = PdfTextLayer::default().extract(&path).await?;
        assert!(text.contains("Invoice 1001"));
        assert!(text.contains("Total due: 42.00"));
        Ok(())
    }
}
