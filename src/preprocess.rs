//! Image cleanup before handing pages to Tesseract.
//!
//! Handwriting and poor scans recognize much better after they've been
//! flattened to high-contrast black and white.

use image::{
    DynamicImage, GrayImage, Luma,
    imageops::{self, FilterType},
};
use imageproc::{
    contrast::{ThresholdType, stretch_contrast, threshold},
    filter::median_filter,
    stats::percentile,
};

/// Settings for [`preprocess`] and [`preprocess_advanced`].
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessOptions {
    /// Shrink pages wider than this.
    pub max_width: u32,
    /// Shrink pages taller than this.
    pub max_height: u32,
    /// Pixels above this level become white, the rest black.
    pub threshold: u8,
    /// Apply a 3x3 median filter (advanced mode only).
    pub denoise: bool,
    /// Normalize, sharpen and gamma-correct (advanced mode only).
    pub enhance: bool,
    /// Gamma used by `enhance`.
    pub gamma: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            max_width: 2400,
            max_height: 3200,
            threshold: 128,
            denoise: true,
            enhance: true,
            gamma: 1.2,
        }
    }
}

impl PreprocessOptions {
    /// The defaults, binarizing at a different level.
    pub fn with_threshold(threshold: u8) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

/// Sigma for our unsharp mask.
const SHARPEN_SIGMA: f32 = 1.0;

/// Minimum brightness difference that the unsharp mask will amplify.
const SHARPEN_THRESHOLD: i32 = 2;

/// Standard cleanup: fit inside the size limits, grayscale, stretch contrast,
/// sharpen and binarize.
pub fn preprocess(image: &DynamicImage, opts: &PreprocessOptions) -> GrayImage {
    let image = fit_inside(image, opts.max_width, opts.max_height);
    let gray = normalize(&image.to_luma8());
    let gray = imageops::unsharpen(&gray, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
    threshold(&gray, opts.threshold, ThresholdType::Binary)
}

/// Cleanup with optional denoising and gamma correction, at the original size.
pub fn preprocess_advanced(image: &DynamicImage, opts: &PreprocessOptions) -> GrayImage {
    let mut gray = image.to_luma8();
    if opts.denoise {
        gray = median_filter(&gray, 1, 1);
    }
    if opts.enhance {
        gray = normalize(&gray);
        gray = imageops::unsharpen(&gray, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
        gamma(&mut gray, opts.gamma);
    }
    threshold(&gray, opts.threshold, ThresholdType::Binary)
}

/// Shrink `image` to fit inside `max_width` x `max_height`, keeping its aspect
/// ratio. Images that already fit are never enlarged.
fn fit_inside(image: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if image.width() <= max_width && image.height() <= max_height {
        image.clone()
    } else {
        image.resize(max_width, max_height, FilterType::Lanczos3)
    }
}

/// Stretch brightness so the darkest 1% of pixels become black and the
/// brightest 1% become white.
fn normalize(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let low = percentile(gray, 1);
    let high = percentile(gray, 99);
    if high <= low {
        return gray.clone();
    }
    stretch_contrast(gray, low, high, 0, 255)
}

/// Apply gamma correction, brightening midtones when `gamma > 1`.
fn gamma(gray: &mut GrayImage, gamma: f32) {
    if gamma <= 0.0 {
        return;
    }
    let mut table = [0u8; 256];
    for (level, out) in table.iter_mut().enumerate() {
        let scaled = (level as f32 / 255.0).powf(1.0 / gamma) * 255.0;
        *out = scaled.round().clamp(0.0, 255.0) as u8;
    }
    for Luma([v]) in gray.pixels_mut() {
        *v = table[usize::from(*v)];
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn large_pages_shrink_to_fit_but_small_pages_do_not_grow() {
        let opts = PreprocessOptions {
            max_width: 240,
            max_height: 320,
            ..PreprocessOptions::default()
        };
        let big = DynamicImage::ImageRgb8(RgbImage::from_pixel(480, 320, Rgb([9, 9, 9])));
        let out = preprocess(&big, &opts);
        assert_eq!(out.dimensions(), (240, 160));

        let small = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb([9, 9, 9])));
        let out = preprocess(&small, &opts);
        assert_eq!(out.dimensions(), (30, 20));
    }

    #[test]
    fn output_is_binary() {
        let gradient = RgbImage::from_fn(64, 8, |x, _| {
            let v = (x * 4) as u8;
            Rgb([v, v, v])
        });
        let out = preprocess(
            &DynamicImage::ImageRgb8(gradient),
            &PreprocessOptions::default(),
        );
        assert!(out.pixels().all(|Luma([v])| *v == 0 || *v == 255));
        assert!(out.pixels().any(|Luma([v])| *v == 0));
        assert!(out.pixels().any(|Luma([v])| *v == 255));
    }

    #[test]
    fn only_pixels_above_threshold_turn_white() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(4, 1, |x, _| {
            Luma([[0, 128, 129, 255][x as usize]])
        }));
        let opts = PreprocessOptions {
            denoise: false,
            enhance: false,
            ..PreprocessOptions::default()
        };
        let out = preprocess_advanced(&image, &opts);
        assert_eq!(out.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn denoising_removes_salt_noise() {
        let mut gray = GrayImage::from_pixel(5, 5, Luma([0]));
        gray.put_pixel(2, 2, Luma([255]));
        let opts = PreprocessOptions {
            enhance: false,
            ..PreprocessOptions::default()
        };
        let out = preprocess_advanced(&DynamicImage::ImageLuma8(gray), &opts);
        assert!(out.pixels().all(|Luma([v])| *v == 0));
    }

    #[test]
    fn normalize_stretches_low_contrast() {
        let gray = GrayImage::from_fn(100, 1, |x, _| Luma([100 + (x / 2) as u8]));
        let gray = normalize(&gray);
        let min = gray.pixels().map(|p| p[0]).min().unwrap_or(255);
        let max = gray.pixels().map(|p| p[0]).max().unwrap_or(0);
        assert!(min <= 10, "min was {min}");
        assert!(max >= 245, "max was {max}");
    }

    #[test]
    fn gamma_above_one_brightens_midtones() {
        let mut gray = GrayImage::from_pixel(1, 1, Luma([128]));
        gamma(&mut gray, 1.2);
        assert!(gray.get_pixel(0, 0)[0] > 128);
    }

    #[test]
    fn advanced_mode_keeps_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 10, 10])));
        let out = preprocess_advanced(&image, &PreprocessOptions::default());
        assert_eq!(out.dimensions(), (40, 30));
    }
}
