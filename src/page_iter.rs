//! Turn a document into an ordered sequence of page images.
//!
//! Everything downstream of this module sees only [`Page`] values: a single
//! image file is one page, a TIFF is one page per directory, and a PDF is
//! rasterized to one PNG per page.

use std::{
    collections::BTreeMap,
    fs,
    io::{BufReader, Cursor},
    process::Output,
    sync::LazyLock,
    vec,
};

use clap::Args;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use regex::Regex;
use tiff::{
    ColorType,
    decoder::{Decoder, DecodingResult, ifd::Value},
    tags::{IfdPointer, Tag},
};
use tokio::process::Command;

use crate::{
    async_utils::{
        blocking_iter_streams::spawn_blocking_propagating_panics,
        check_for_command_failure, spawn_error,
    },
    cpu_limit::with_cpu_semaphore,
    data_url::data_url,
    prelude::*,
};

/// Image types supported as-is.
const SUPPORTED_IMAGE_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// TIFF MIME type, handled separately due to multipage complexity.
const TIFF_MIME_TYPE: &str = "image/tiff";

/// PDF MIME type.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A single page image.
#[derive(Clone, Debug)]
pub struct Page {
    /// The MIME type of our data. Always one of [`SUPPORTED_IMAGE_TYPES`].
    pub mime_type: String,
    /// The encoded image data for our page.
    pub data: Vec<u8>,
}

impl Page {
    /// Wrap an in-memory image as a PNG page.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .context("failed to encode page as PNG")?;
        Ok(Self {
            mime_type: "image/png".to_owned(),
            data,
        })
    }

    /// Convert to a data URL.
    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.data)
    }

    /// A file extension matching our MIME type, for tools that insist on one.
    pub fn file_extension(&self) -> Result<&'static str> {
        mime_guess::get_mime_extensions_str(&self.mime_type)
            .and_then(|exts| exts.first().copied())
            .ok_or_else(|| anyhow!("cannot determine extension for {}", self.mime_type))
    }

    /// Decode this page into pixels.
    pub fn decode(&self) -> Result<DynamicImage> {
        let format = ImageFormat::from_mime_type(&self.mime_type)
            .ok_or_else(|| anyhow!("cannot decode pages of type {}", self.mime_type))?;
        image::load_from_memory_with_format(&self.data, format)
            .with_context(|| format!("failed to decode {} page", self.mime_type))
    }
}

/// Options for constructing a [`PageIter`].
#[derive(Args, Clone, Debug)]
pub struct PageIterOptions {
    /// The DPI to use when rasterizing PDF pages.
    #[clap(long, default_value = "200")]
    pub rasterize_dpi: u32,

    /// The maximum number of pages to process. If this is set, we will
    /// stop processing after this many pages and record a warning.
    #[clap(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub max_pages: Option<usize>,
}

impl Default for PageIterOptions {
    fn default() -> Self {
        Self {
            rasterize_dpi: 200,
            max_pages: None,
        }
    }
}

/// An iterator over the pages of a document, as images.
///
/// PDFs are rasterized up front using Poppler's `pdftocairo` CLI tool.
pub struct PageIter {
    /// An optional temporary directory, which holds extracted versions of pages.
    ///
    /// This is released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// The MIME type of our outputs.
    mime_type: String,
    /// Iterator over the page files.
    dir_iter: vec::IntoIter<PathBuf>,
    /// How many pages will we actually return?
    page_count: usize,
    /// Expected number of pages in the document.
    total_pages: usize,
    /// The maximum number of pages we are allowed to process.
    max_pages: Option<usize>,
    /// Any warnings that occurred while processing the document.
    warnings: Vec<String>,
}

impl PageIter {
    /// Create a new [`PageIter`] from a path, based on the detected MIME type.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(
        path: &Path,
        options: &PageIterOptions,
        password: Option<&str>,
    ) -> Result<Self> {
        let mime_type = get_mime_type(path)?;

        if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            // A single image is a single page.
            Ok(Self {
                tmpdir: None,
                mime_type,
                dir_iter: vec![path.to_owned()].into_iter(),
                page_count: 1,
                total_pages: 1,
                max_pages: options.max_pages,
                warnings: vec![],
            })
        } else if mime_type == TIFF_MIME_TYPE {
            Self::from_tiff(path, options).await
        } else if mime_type == PDF_MIME_TYPE {
            Self::from_rasterized_pdf(path, options, password).await
        } else {
            Err(anyhow!(
                "unsupported MIME type {} for {:?} (supported: PNG, JPEG, WebP, GIF, TIFF, PDF)",
                mime_type,
                path.display()
            ))
        }
    }

    /// Create a new [`PageIter`] from a PDF file, rasterizing each page.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = options.rasterize_dpi))]
    async fn from_rasterized_pdf(
        path: &Path,
        options: &PageIterOptions,
        password: Option<&str>,
    ) -> Result<Self> {
        let total_pages = get_pdf_page_count(path, password).await?;

        // Construct an output filename. pdftocairo will add page numbers to
        // this.
        let filename = path
            .file_name()
            .context("failed to get filename from PDF path")?;

        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let out_path = tmpdir.path().join(filename).with_extension("");

        // We use `with_cpu_semaphore` because `pdftocairo` will use _at least_
        // 100% of a CPU.
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-r")
            .arg(options.rasterize_dpi.to_string());
        if let Some(password) = password {
            cmd.arg("-opw").arg(password);
        }
        add_last_page_arg_if_needed(options, total_pages, &mut cmd);
        let output = with_cpu_semaphore(|| async {
            cmd.arg(path)
                .arg(out_path)
                .output()
                .await
                .map_err(|err| spawn_error("pdftocairo", err))
                .with_context(|| format!("failed to rasterize {:?}", path.display()))
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;
        Self::from_tempdir(
            options,
            tmpdir,
            "image/png".to_string(),
            total_pages,
            &output,
        )
    }

    /// Create a [`PageIter`] from a [`tempfile::TempDir`] full of files
    /// named in page order, plus a MIME type.
    fn from_tempdir(
        options: &PageIterOptions,
        tmpdir: tempfile::TempDir,
        mime_type: String,
        total_pages: usize,
        output: &Output,
    ) -> Result<Self> {
        let dir_paths = sorted_page_files(tmpdir.path())?;

        // Save any output from the command as warnings.
        let mut warnings = vec![];
        for stream in [&output.stdout, &output.stderr] {
            for line in String::from_utf8_lossy(stream).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    warnings.push(line.to_string());
                }
            }
        }

        Ok(Self {
            tmpdir: Some(tmpdir),
            mime_type,
            page_count: dir_paths.len(),
            dir_iter: dir_paths.into_iter(),
            total_pages,
            max_pages: options.max_pages,
            warnings,
        })
    }

    /// Create a new [`PageIter`] from a multipage TIFF file.
    ///
    /// This method:
    /// 1. Iterates the main IFD chain to extract document pages
    /// 2. Validates any SubIFDs to ensure no document content is hidden
    /// 3. Converts each page to PNG
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn from_tiff(path: &Path, options: &PageIterOptions) -> Result<Self> {
        let path_owned = path.to_owned();
        let max_pages = options.max_pages;

        // Run TIFF processing on blocking thread pool (CPU-intensive).
        let (tmpdir, total_pages, warnings) =
            spawn_blocking_propagating_panics(move || {
                process_tiff_sync(&path_owned, max_pages)
            })
            .await?;

        let dir_paths = sorted_page_files(tmpdir.path())?;
        Ok(Self {
            tmpdir: Some(tmpdir),
            mime_type: "image/png".to_string(),
            page_count: dir_paths.len(),
            dir_iter: dir_paths.into_iter(),
            total_pages,
            max_pages: options.max_pages,
            warnings,
        })
    }

    /// How many pages will this iterator return?
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Get any warnings that occurred while processing the document.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Will this iterator return only an incomplete set of pages?
    pub fn is_incomplete(&self) -> bool {
        if let Some(max_pages) = self.max_pages {
            self.total_pages > max_pages
        } else {
            false
        }
    }

    /// If this iterator will return only an incomplete set of pages, return an
    /// error explaining why.
    pub fn check_complete(&self) -> Result<()> {
        if let Some(max_pages) = self.max_pages
            && self.is_incomplete()
        {
            Err(anyhow!(
                "Only {}/{} pages processed (because of --max-pages)",
                max_pages,
                self.total_pages
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for PageIter {
    fn drop(&mut self) {
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for PageIter {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.dir_iter.next()?;
        let bytes = match fs::read(&path)
            .with_context(|| format!("failed to read file {:?}", path.display()))
        {
            Ok(bytes) => bytes,
            Err(err) => return Some(Err(err)),
        };

        // Delete extracted pages to recover space a bit early.
        if self.tmpdir.is_some()
            && let Err(err) = fs::remove_file(&path)
                .with_context(|| format!("failed to delete file {:?}", path.display()))
        {
            return Some(Err(err));
        }

        Some(Ok(Page {
            mime_type: self.mime_type.clone(),
            data: bytes,
        }))
    }
}

/// List the files in a directory, sorted so that page numbers come out in
/// order.
///
/// `pdftocairo` pads page numbers to the width of the largest page number, so
/// a lexical sort is enough.
fn sorted_page_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = dir
        .read_dir()
        .with_context(|| {
            format!("failed to read temporary directory {:?}", dir.display())
        })?
        .map(|entry| {
            let entry = entry.with_context(|| {
                format!(
                    "failed to read entry in temporary directory {:?}",
                    dir.display()
                )
            })?;
            Ok(entry.path())
        })
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path, password: Option<&str>) -> Result<usize> {
    let mut cmd = Command::new("pdfinfo");
    if let Some(password) = password {
        cmd.arg("-opw").arg(password);
    }
    let output = cmd
        .arg(path)
        .output()
        .await
        .map_err(|err| spawn_error("pdfinfo", err))
        .with_context(|| format!("failed to inspect {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output).with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Extract the `Pages:` property from `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    Ok(page_count_str.parse::<usize>()?)
}

/// Add a "last page" argument to a [`Command`].
fn add_last_page_arg_if_needed(
    options: &PageIterOptions,
    total_pages: usize,
    cmd: &mut Command,
) {
    if let Some(max_pages) = options.max_pages
        && total_pages > max_pages
    {
        // Poppler uses 1-based, inclusive page ranges.
        cmd.arg("-l").arg(max_pages.to_string());
    }
}

/// Get the MIME type of a file.
///
/// We sniff the content first, because file names (and especially URLs) lie.
/// Formats without magic numbers, like plain text, fall back to the
/// extension.
pub fn get_mime_type(path: &Path) -> Result<String> {
    let sniffed = infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?;
    if let Some(kind) = sniffed {
        return Ok(kind.mime_type().to_string());
    }
    mime_guess::from_path(path)
        .first_raw()
        .map(|mime| mime.to_string())
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))
}

// ============================================================================
// TIFF pages
// ============================================================================

/// NewSubfileType bits from the TIFF 6.0 specification (plus DNG).
mod subfile_type {
    /// Reduced resolution copy (thumbnail or preview).
    pub const REDUCED_RESOLUTION: u32 = 0x1;
    /// Single page of a multi-page document.
    pub const SINGLE_PAGE: u32 = 0x2;
    /// Transparency mask for another image.
    pub const TRANSPARENCY_MASK: u32 = 0x4;
    /// DNG depth map, enhanced image and semantic mask bits.
    pub const DNG_BITS: u32 = 0x8 | 0x10 | 0x10000;
}

/// Split a TIFF file into PNG pages, returning a tempdir holding the pages,
/// the total number of pages in the file, and any warnings.
///
/// Scanners store pages as a chain of top-level IFDs, which is what we walk.
/// A few tools instead hide pages in SubIFDs. Those we refuse, rather than
/// silently dropping pages. SubIFDs holding thumbnails or masks are skipped,
/// so a model never sees the same page twice at different resolutions.
fn process_tiff_sync(
    path: &Path,
    max_pages: Option<usize>,
) -> Result<(tempfile::TempDir, usize, Vec<String>)> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open TIFF file {:?}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).with_context(|| {
        format!("failed to create TIFF decoder for {:?}", path.display())
    })?;

    let tmpdir = tempfile::TempDir::with_prefix("tiff-pages")?;
    let mut warnings = Vec::new();
    let mut extracted = 0;
    let mut total_pages = 0;
    loop {
        // The first IFD is loaded by `Decoder::new`.
        if total_pages > 0 {
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().with_context(|| {
                format!("failed to advance to IFD {} in {:?}", total_pages, path.display())
            })?;
        }
        let ifd_index = total_pages;
        total_pages += 1;

        // Past `max_pages`, we only count.
        if max_pages.is_some_and(|max| extracted >= max) {
            continue;
        }

        check_subifds(&mut decoder, path, ifd_index, &mut warnings)?;
        let image = decode_tiff_page(&mut decoder).with_context(|| {
            format!("failed to decode IFD {} in {:?}", ifd_index, path.display())
        })?;
        let png_path = tmpdir.path().join(format!("page-{:05}.png", extracted));
        image
            .save_with_format(&png_path, ImageFormat::Png)
            .with_context(|| format!("failed to write PNG {:?}", png_path.display()))?;
        extracted += 1;
    }

    debug!(
        path = %path.display(),
        extracted,
        total_pages,
        "Split multipage TIFF"
    );
    Ok((tmpdir, total_pages, warnings))
}

/// Make sure that no SubIFD of the current IFD could be hiding a page.
fn check_subifds<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
    ifd_index: usize,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let offsets: Vec<u64> = match decoder.find_tag(Tag::SubIfd) {
        Ok(Some(Value::Ifd(offset))) => vec![u64::from(offset)],
        Ok(Some(Value::List(list))) => list
            .iter()
            .filter_map(|v| match v {
                Value::Ifd(offset) => Some(u64::from(*offset)),
                _ => None,
            })
            .collect(),
        _ => return Ok(()),
    };

    for (sub_idx, offset) in offsets.into_iter().enumerate() {
        let subdir = match decoder.read_directory(IfdPointer(offset)) {
            Ok(dir) => dir,
            Err(err) => {
                warnings.push(format!(
                    "Could not read SubIFD {} of IFD {}: {}",
                    sub_idx, ifd_index, err
                ));
                continue;
            }
        };
        let kind = decoder
            .read_directory_tags(&subdir)
            .find_tag(Tag::NewSubfileType)
            .ok()
            .flatten()
            .and_then(|value| value.into_u32().ok())
            .unwrap_or(0);

        let skippable = subfile_type::REDUCED_RESOLUTION
            | subfile_type::TRANSPARENCY_MASK
            | subfile_type::DNG_BITS;
        if kind & skippable != 0 {
            debug!(ifd_index, sub_idx, kind, "Skipping non-page SubIFD");
        } else if kind == 0 || kind & subfile_type::SINGLE_PAGE != 0 {
            return Err(anyhow!(
                "TIFF file {:?} may store pages in SubIFD {} of IFD {} \
                 (NewSubfileType={}), which we can't split safely. Convert it \
                 to PDF or individual images first.",
                path.display(),
                sub_idx,
                ifd_index,
                kind
            ));
        }
    }
    Ok(())
}

/// Decode the current IFD into an image.
fn decode_tiff_page<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<DynamicImage> {
    let (width, height) = decoder.dimensions()?;
    let color_type = decoder.colortype()?;
    let samples = match decoder.read_image()? {
        DecodingResult::U8(data) => data,
        // Keep the high byte of 16-bit samples.
        DecodingResult::U16(data) => data.iter().map(|&v| (v >> 8) as u8).collect(),
        _ => return Err(anyhow!("unsupported TIFF sample format")),
    };
    let bad_size = || anyhow!("TIFF sample count does not match {width}x{height}");
    let image = match color_type {
        ColorType::Gray(_) => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, samples).ok_or_else(bad_size)?,
        ),
        ColorType::RGB(_) => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, samples).ok_or_else(bad_size)?,
        ),
        ColorType::RGBA(_) => DynamicImage::ImageRgba8(
            RgbaImage::from_raw(width, height, samples).ok_or_else(bad_size)?,
        ),
        other => return Err(anyhow!("unsupported TIFF color type {:?}", other)),
    };
    Ok(image)
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};
    use tiff::encoder::{TiffEncoder, colortype};

    use super::*;

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    /// Write a small RGB PNG into `dir`.
    fn write_png(dir: &Path, name: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        let image = RgbImage::from_pixel(8, 4, Rgb([255, 255, 255]));
        image.save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    }

    /// Write a grayscale TIFF with `pages` directories into `dir`.
    fn write_tiff(dir: &Path, pages: usize) -> Result<PathBuf> {
        let path = dir.join("pages.tiff");
        let file = fs::File::create(&path)?;
        let mut encoder = TiffEncoder::new(file)?;
        for page in 0..pages {
            let pixels = GrayImage::from_pixel(6, 6, Luma([(page * 40) as u8]));
            encoder.write_image::<colortype::Gray8>(6, 6, pixels.as_raw())?;
        }
        Ok(path)
    }

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("ERROR: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[test]
    fn pdfinfo_page_count_is_parsed() -> Result<()> {
        let output = "Title:          scan\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_page_count(output)?, 12);
        assert!(parse_pdfinfo_page_count("Title: x\n").is_err());
        Ok(())
    }

    #[test]
    fn mime_type_is_sniffed_from_content() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("mime")?;
        // A PNG with a misleading extension.
        let png = write_png(dir.path(), "page.pdf")?;
        assert_eq!(get_mime_type(&png)?, "image/png");

        let text = dir.path().join("notes.txt");
        fs::write(&text, "hello")?;
        assert_eq!(get_mime_type(&text)?, "text/plain");
        Ok(())
    }

    #[tokio::test]
    async fn image_is_a_single_page() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("image")?;
        let png = write_png(dir.path(), "page.png")?;
        let page_iter = PageIter::from_path(&png, &PageIterOptions::default(), None).await?;
        assert_eq!(page_iter.page_count(), 1);
        let pages = page_iter.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].mime_type, "image/png");
        assert_eq!(pages[0].decode()?.width(), 8);
        // We never delete the caller's file.
        assert!(png.exists());
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("unsupported")?;
        let text = dir.path().join("notes.txt");
        fs::write(&text, "hello")?;
        let err = PageIter::from_path(&text, &PageIterOptions::default(), None)
            .await
            .err()
            .expect("text should not paginate");
        assert!(err.to_string().contains("unsupported MIME type"));
        Ok(())
    }

    #[tokio::test]
    async fn tiff_page_iter_returns_correct_number_of_pages() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("tiff")?;
        let tiff = write_tiff(dir.path(), 2)?;
        let page_iter =
            PageIter::from_path(&tiff, &PageIterOptions::default(), None).await?;
        assert_eq!(page_iter.page_count(), 2);
        assert!(page_iter.check_complete().is_ok());
        let pages = page_iter.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 2);
        for page in &pages {
            assert_eq!(page.mime_type, "image/png");
        }
        Ok(())
    }

    #[tokio::test]
    async fn tiff_page_iter_obeys_max_pages() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("tiff")?;
        let tiff = write_tiff(dir.path(), 3)?;
        let page_iter = PageIter::from_path(
            &tiff,
            &PageIterOptions {
                rasterize_dpi: 200,
                max_pages: Some(1),
            },
            None,
        )
        .await?;
        assert!(page_iter.is_incomplete());
        assert!(page_iter.check_complete().is_err());
        assert_eq!(page_iter.page_count(), 1);
        let pages = page_iter.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 1);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn page_count_returns_correct_number_of_pages() -> Result<()> {
        let page_count = get_pdf_page_count(Path::new(TEST_PDF_PATH), None).await?;
        assert_eq!(page_count, 2);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn pdf_pages_are_rasterized_in_order() -> Result<()> {
        let page_iter =
            PageIter::from_path(Path::new(TEST_PDF_PATH), &PageIterOptions::default(), None)
                .await?;
        assert_eq!(page_iter.page_count(), 2);
        let pages = page_iter.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.mime_type == "image/png"));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn pdf_page_iter_obeys_max_pages() -> Result<()> {
        let page_iter = PageIter::from_path(
            Path::new(TEST_PDF_PATH),
            &PageIterOptions {
                rasterize_dpi: 72,
                max_pages: Some(1),
            },
            None,
        )
        .await?;
        assert!(page_iter.check_complete().is_err());
        let pages = page_iter.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 1);
        Ok(())
    }
}
