//! Where documents come from: local paths or HTTP(S) URLs.

use std::{fmt, time::Duration};

use tempfile::NamedTempFile;

use crate::prelude::*;

/// A document to process, as named on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// An `http://` or `https://` URL.
    Url(String),
}

impl DocumentSource {
    /// Classify a command-line argument as a path or a URL.
    pub fn parse(source: &str) -> Self {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            DocumentSource::Url(source.to_owned())
        } else {
            DocumentSource::Path(PathBuf::from(source))
        }
    }

    /// Make this document available as a local file.
    ///
    /// URLs are downloaded to a temporary file, which is deleted when the
    /// returned [`LocalDocument`] is dropped.
    #[instrument(level = "debug", skip_all, fields(source = %self))]
    pub async fn materialize(&self) -> Result<LocalDocument> {
        match self {
            DocumentSource::Path(path) => {
                if !path.is_file() {
                    return Err(anyhow!("no such file: {:?}", path.display()));
                }
                Ok(LocalDocument {
                    path: path.to_owned(),
                    _download: None,
                })
            }
            DocumentSource::Url(url) => download(url).await,
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Path(path) => write!(f, "{}", path.display()),
            DocumentSource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// A document available on the local filesystem.
#[derive(Debug)]
pub struct LocalDocument {
    /// The path to read.
    pub path: PathBuf,
    /// A downloaded copy, kept alive until we're done with `path`.
    _download: Option<NamedTempFile>,
}

/// How long do we wait for a document download?
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Download `url` into a temporary file.
async fn download(url: &str) -> Result<LocalDocument> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    download_with(&client, url).await
}

/// Download `url` into a temporary file using `client`.
async fn download_with(client: &reqwest::Client, url: &str) -> Result<LocalDocument> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("server refused to return {url}"))?;
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed to read response body from {url}"))?;
    debug!(url, size = bytes.len(), "Downloaded document");

    // Keep the URL's extension, so that we can still guess the type of
    // formats that have no magic number, like plain text.
    let suffix = url_extension(url)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("download")
        .suffix(&suffix)
        .tempfile()
        .context("failed to create temporary file for download")?;
    std::io::Write::write_all(&mut file, &bytes)
        .context("failed to write downloaded document")?;
    Ok(LocalDocument {
        path: file.path().to_owned(),
        _download: Some(file),
    })
}

/// Get the file extension from the path portion of a URL, if any.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let (_, rest) = path.split_once("://")?;
    let last_segment = rest.split('/').skip(1).last()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
    };

    use crate::page_iter::get_mime_type;

    use super::*;

    /// Answer a single HTTP request with `status` and `body`, and return the
    /// server's base URL.
    async fn serve_once(status: &'static str, body: Vec<u8>) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let header = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        });
        Ok(format!("http://{addr}"))
    }

    /// A client which never goes through a proxy, so it can reach loopback.
    fn local_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("build HTTP client")
    }

    #[test]
    fn parse_distinguishes_urls_from_paths() {
        assert_eq!(
            DocumentSource::parse("https://example.com/scan.png"),
            DocumentSource::Url("https://example.com/scan.png".to_owned())
        );
        assert_eq!(
            DocumentSource::parse("HTTP://example.com/a.pdf"),
            DocumentSource::Url("HTTP://example.com/a.pdf".to_owned())
        );
        assert_eq!(
            DocumentSource::parse("scans/http_page.png"),
            DocumentSource::Path(PathBuf::from("scans/http_page.png"))
        );
    }

    #[test]
    fn url_extension_ignores_query_and_host() {
        assert_eq!(url_extension("https://example.com/a/b.pdf?x=1"), Some("pdf"));
        assert_eq!(url_extension("https://example.com/notes.txt#top"), Some("txt"));
        assert_eq!(url_extension("https://example.com"), None);
        assert_eq!(url_extension("https://example.com/dir/"), None);
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let source = DocumentSource::parse("/definitely/not/here.png");
        let err = source.materialize().await.expect_err("should fail");
        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn downloaded_type_comes_from_content_not_url() -> Result<()> {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        let base = serve_once("200 OK", png.clone()).await?;

        let local = download_with(&local_client(), &format!("{base}/scan.pdf")).await?;
        assert_eq!(std::fs::read(&local.path)?, png);
        assert_eq!(get_mime_type(&local.path)?, "image/png");

        let path = local.path.clone();
        drop(local);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn http_errors_are_errors() -> Result<()> {
        let base = serve_once("404 Not Found", b"gone".to_vec()).await?;
        let err = download_with(&local_client(), &format!("{base}/missing.png"))
            .await
            .expect_err("404 should fail");
        assert!(format!("{err:#}").contains("404"), "{err:#}");
        Ok(())
    }
}
