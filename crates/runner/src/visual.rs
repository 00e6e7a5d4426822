//! Screenshot scoring against reference images
//!
//! Two numbers come out of a comparison: a mean square error (sum of squared
//! per-channel differences divided by the pixel count, clamped to
//! [`MSE_CLAMP`]) and the mean structural similarity over all color
//! channels. The capture is resized to the reference's dimensions first.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::path::Path;

/// Errors above this carry no information for matching
pub const MSE_CLAMP: f64 = 10.0;

/// Side length of the square SSIM window
const SSIM_WINDOW: u32 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const SSIM_DATA_RANGE: f64 = 255.0;

/// Result of scoring one capture against one reference
#[derive(Debug, Clone)]
pub struct Score {
    /// Clamped mean square error, lower is closer
    pub mse: f64,

    /// Mean structural similarity, 1.0 for identical images
    pub ssim: f64,

    /// Absolute per-channel difference, in reference dimensions
    pub diff: RgbImage,
}

/// Decode an image file to 8-bit RGB
pub fn load_rgb(path: &Path) -> image::ImageResult<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Score `current` against `reference`
pub fn compare(current: &RgbImage, reference: &RgbImage) -> Score {
    let (width, height) = reference.dimensions();
    let current = if current.dimensions() == (width, height) {
        Cow::Borrowed(current)
    } else {
        Cow::Owned(imageops::resize(current, width, height, FilterType::Triangle))
    };

    let (mse, diff) = mean_square_error(&current, reference);
    let ssim = structural_similarity(&current, reference);

    Score { mse, ssim, diff }
}

/// Clamped MSE and the absolute difference image. Both images must have the
/// same dimensions.
fn mean_square_error(current: &RgbImage, reference: &RgbImage) -> (f64, RgbImage) {
    let (width, height) = reference.dimensions();
    let mut diff = RgbImage::new(width, height);
    let mut err = 0.0f64;

    for (x, y, pixel) in reference.enumerate_pixels() {
        let cur = current.get_pixel(x, y);
        let mut out = [0u8; 3];
        for c in 0..3 {
            let d = cur[c].abs_diff(pixel[c]);
            out[c] = d;
            err += (d as f64) * (d as f64);
        }
        diff.put_pixel(x, y, image::Rgb(out));
    }

    let pixels = (width as f64) * (height as f64);
    let mse = if pixels > 0.0 { err / pixels } else { 0.0 };
    (mse.min(MSE_CLAMP), diff)
}

/// Mean SSIM over all channels, each channel averaged over every window
/// that fits entirely inside the image. Uses sample covariance within the
/// window.
pub fn structural_similarity(a: &RgbImage, b: &RgbImage) -> f64 {
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return 1.0;
    }
    let window = SSIM_WINDOW.min(width).min(height);

    let total: f64 = (0..3).map(|c| channel_ssim(a, b, c, window)).sum();
    total / 3.0
}

/// Summed-area tables for one channel pair
struct Moments {
    stride: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    aa: Vec<f64>,
    bb: Vec<f64>,
    ab: Vec<f64>,
}

impl Moments {
    fn new(a: &RgbImage, b: &RgbImage, channel: usize) -> Self {
        let (width, height) = a.dimensions();
        let stride = width as usize + 1;
        let len = stride * (height as usize + 1);
        let mut m = Self {
            stride,
            a: vec![0.0; len],
            b: vec![0.0; len],
            aa: vec![0.0; len],
            bb: vec![0.0; len],
            ab: vec![0.0; len],
        };

        for y in 0..height {
            let mut row = [0.0f64; 5];
            for x in 0..width {
                let pa = a.get_pixel(x, y)[channel] as f64;
                let pb = b.get_pixel(x, y)[channel] as f64;
                row[0] += pa;
                row[1] += pb;
                row[2] += pa * pa;
                row[3] += pb * pb;
                row[4] += pa * pb;

                let idx = (y as usize + 1) * stride + x as usize + 1;
                let above = idx - stride;
                m.a[idx] = m.a[above] + row[0];
                m.b[idx] = m.b[above] + row[1];
                m.aa[idx] = m.aa[above] + row[2];
                m.bb[idx] = m.bb[above] + row[3];
                m.ab[idx] = m.ab[above] + row[4];
            }
        }
        m
    }

    fn rect(&self, table: &[f64], x: usize, y: usize, size: usize) -> f64 {
        let s = self.stride;
        table[(y + size) * s + x + size] - table[y * s + x + size] - table[(y + size) * s + x]
            + table[y * s + x]
    }
}

fn channel_ssim(a: &RgbImage, b: &RgbImage, channel: usize, window: u32) -> f64 {
    let (width, height) = a.dimensions();
    let m = Moments::new(a, b, channel);

    let size = window as usize;
    let n = (size * size) as f64;
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (SSIM_K1 * SSIM_DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * SSIM_DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=(height - window) as usize {
        for x in 0..=(width - window) as usize {
            let ux = m.rect(&m.a, x, y, size) / n;
            let uy = m.rect(&m.b, x, y, size) / n;
            let vx = cov_norm * (m.rect(&m.aa, x, y, size) / n - ux * ux);
            let vy = cov_norm * (m.rect(&m.bb, x, y, size) / n - uy * uy);
            let vxy = cov_norm * (m.rect(&m.ab, x, y, size) / n - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            count += 1;
        }
    }

    total / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(width: u32, height: u32, seed: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 7 + y * 13 + seed * 31) % 256;
            image::Rgb([v as u8, (255 - v) as u8, ((x ^ y) % 256) as u8])
        })
    }

    #[test]
    fn test_identical_images() {
        let img = pattern(64, 48, 1);
        let score = compare(&img, &img);
        assert_eq!(score.mse, 0.0);
        assert!((score.ssim - 1.0).abs() < 1e-9, "ssim = {}", score.ssim);
        assert!(score.diff.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_scoring_is_repeatable() {
        let a = pattern(40, 30, 1);
        let b = pattern(40, 30, 2);
        let first = compare(&a, &b);
        let second = compare(&a, &b);
        assert_eq!(first.mse, second.mse);
        assert_eq!(first.ssim, second.ssim);
    }

    #[test]
    fn test_mse_is_clamped() {
        let black = RgbImage::from_pixel(16, 16, image::Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
        let score = compare(&black, &white);
        assert_eq!(score.mse, MSE_CLAMP);
        assert!(score.ssim < 0.01);
        assert!(score.diff.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_small_difference_scores_between_bounds() {
        let reference = RgbImage::from_pixel(20, 20, image::Rgb([100, 100, 100]));
        let mut current = reference.clone();
        current.put_pixel(3, 4, image::Rgb([101, 100, 100]));

        let score = compare(&current, &reference);
        // one channel off by one in 400 pixels
        assert!((score.mse - 1.0 / 400.0).abs() < 1e-12);
        assert!(score.ssim < 1.0 && score.ssim > 0.9);
        assert_eq!(score.diff.get_pixel(3, 4).0, [1, 0, 0]);
    }

    #[test]
    fn test_capture_is_resized_to_reference() {
        let reference = RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 30]));
        let current = RgbImage::from_pixel(64, 48, image::Rgb([10, 200, 30]));
        let score = compare(&current, &reference);
        assert_eq!(score.diff.dimensions(), (32, 24));
        // filter rounding may move a channel by one step at most
        assert!(score.mse <= 3.0, "mse = {}", score.mse);
        assert!(score.ssim > 0.999, "ssim = {}", score.ssim);
    }

    /// Gradient pair: red doubled, green equal, blue unrelated
    fn ssim_fixture(width: u32, height: u32) -> (RgbImage, RgbImage) {
        let a = RgbImage::from_fn(width, height, |x, y| {
            let v = 5 * x + 5 * y + 20;
            image::Rgb([v as u8, (200 - 10 * y) as u8, ((x * 37 + y * 11) % 97) as u8])
        });
        let b = RgbImage::from_fn(width, height, |x, y| {
            let v = 5 * x + 5 * y + 20;
            image::Rgb([
                (2 * v) as u8,
                (200 - 10 * y) as u8,
                ((x * 13 + y * 29) % 89 + 40) as u8,
            ])
        });
        (a, b)
    }

    #[test]
    fn test_ssim_reference_values() {
        // same as skimage structural_similarity(a, b, channel_axis=-1, data_range=255)
        let (a, b) = ssim_fixture(7, 7);
        let single_window = structural_similarity(&a, &b);
        assert!(
            (single_window - 0.661_137_262_809_634_6).abs() < 1e-6,
            "ssim = {}",
            single_window
        );

        let (a, b) = ssim_fixture(9, 8);
        let six_windows = structural_similarity(&a, &b);
        assert!(
            (six_windows - 0.648_824_903_379_506).abs() < 1e-6,
            "ssim = {}",
            six_windows
        );
    }

    #[test]
    fn test_images_smaller_than_window() {
        let a = pattern(3, 5, 1);
        let score = compare(&a, &a);
        assert!((score.ssim - 1.0).abs() < 1e-9);
    }
}
