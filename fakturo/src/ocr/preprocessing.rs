use crate::config::OcrConfig;
use crate::error::{FakturoError, Result};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, ImageReader, Luma};

/// Share of darkest and lightest pixels ignored when stretching contrast, so a
/// single speck of dust or glare does not pin the range.
const CLIP_FRACTION: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub min_dimension: u32,
    pub max_dimension: u32,
    /// Apply a global Otsu threshold after contrast stretching.
    pub binarize: bool,
}

impl PreprocessOptions {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            min_dimension: config.min_image_dimension,
            max_dimension: config.max_image_dimension,
            binarize: true,
        }
    }
}

/// Clean up a scanned invoice before another recognition pass.
///
/// Decodes the upload, rejects images too small to hold legible text,
/// downsamples oversize scans, converts to 8-bit grayscale (dropping alpha),
/// stretches contrast and optionally binarises. Output is PNG.
pub fn preprocess_image(bytes: &[u8], options: &PreprocessOptions) -> Result<Vec<u8>> {
    let img = ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FakturoError::Validation(format!("Failed to read image: {e}")))?
        .decode()
        .map_err(|e| FakturoError::Validation(format!("Failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    if width < options.min_dimension || height < options.min_dimension {
        return Err(FakturoError::Validation(format!(
            "Image too small: {width}x{height}, minimum {min}x{min}",
            min = options.min_dimension
        )));
    }

    let gray = downscale(img, options.max_dimension).to_luma8();
    let mut gray = stretch_contrast(gray);
    if options.binarize {
        let threshold = otsu_threshold(&gray);
        binarize(&mut gray, threshold);
    }

    let mut output = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| FakturoError::Internal(format!("Failed to encode image: {e}")))?;

    Ok(output)
}

fn downscale(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dim && height <= max_dim {
        return img;
    }

    let ratio = max_dim as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);

    img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for pixel in gray.pixels() {
        hist[pixel[0] as usize] += 1;
    }
    hist
}

/// Linear stretch between the clipped low and high percentiles.
fn stretch_contrast(gray: GrayImage) -> GrayImage {
    let hist = histogram(&gray);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return gray;
    }

    let clip = (total as f64 * CLIP_FRACTION) as u64;
    let mut seen = 0u64;
    let low = hist
        .iter()
        .position(|&count| {
            seen += count;
            seen > clip
        })
        .unwrap_or(0) as u8;

    seen = 0;
    let high = 255
        - hist
            .iter()
            .rev()
            .position(|&count| {
                seen += count;
                seen > clip
            })
            .unwrap_or(0) as u8;

    if high <= low {
        return gray;
    }

    let range = (high - low) as f32;
    let mut out = gray;
    for pixel in out.pixels_mut() {
        let v = pixel[0].clamp(low, high);
        pixel[0] = (((v - low) as f32 / range) * 255.0).round() as u8;
    }
    out
}

/// Threshold maximising between-class variance of the histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let hist = histogram(gray);
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 128;
    }

    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_bg = 0.0;
    let mut weight_bg = 0u64;
    let mut best = (0u8, 0.0f64);

    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }

        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let variance = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);

        if variance > best.1 {
            best = (t as u8, variance);
        }
    }

    best.0
}

fn binarize(gray: &mut GrayImage, threshold: u8) {
    for pixel in gray.pixels_mut() {
        *pixel = if pixel[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        };
    }
}
