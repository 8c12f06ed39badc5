use std::io::Cursor;

use image::{DynamicImage, GenericImageView, GrayImage, ImageReader, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

use crate::config::PreprocessingConfig;
use crate::error::{Result, TesseraError};

use super::types::{CoordinateTransform, NormalizedImage, RawImage, BACKGROUND, FOREGROUND};

/// Foreground samples used for skew estimation are capped to keep the search cheap.
const MAX_SKEW_SAMPLES: usize = 200_000;
const MIN_SKEW_SAMPLES: usize = 32;
/// Stretched gray level below which a pixel counts as ink when judging polarity.
const INK_LEVEL: u8 = 128;

/// Decode uploaded bytes into a [`RawImage`].
///
/// Any input the `image` crate cannot read as a raster image is a
/// [`TesseraError::Decode`]; when the bytes are recognisably some other
/// file type the message names it.
pub fn decode_image(bytes: &[u8]) -> Result<RawImage> {
    if bytes.is_empty() {
        return Err(TesseraError::Decode("Empty image upload".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TesseraError::Decode(format!("Failed to read image: {e}")))?;

    let img = reader.decode().map_err(|e| match infer::get(bytes) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Image => TesseraError::Decode(
            format!("Unsupported content type {}: not a raster image", kind.mime_type()),
        ),
        _ => TesseraError::Decode(format!("Failed to decode image: {e}")),
    })?;

    Ok(RawImage::new(img))
}

/// Normalize a decoded image for recognition.
///
/// Applies the following transformations:
/// 1. Validates the minimum dimension
/// 2. Flattens transparency onto white and converts to grayscale
/// 3. Down-scales images larger than the maximum dimension
/// 4. Stretches contrast, then inverts the image when most pixels are ink-dark
/// 5. Estimates skew from a preliminary binarization and rotates it away
/// 6. Binarizes with a local-mean adaptive threshold
///
/// The returned image carries the transform back to `raw`'s coordinates.
pub fn normalize(raw: &RawImage, config: &PreprocessingConfig) -> Result<NormalizedImage> {
    let (width, height) = raw.image.dimensions();
    if width < config.min_image_dimension || height < config.min_image_dimension {
        return Err(TesseraError::Decode(format!(
            "Image too small: {}x{}, minimum {}x{}",
            width, height, config.min_image_dimension, config.min_image_dimension
        )));
    }

    let gray = to_grayscale(&raw.image);
    let (gray, scale) = resize_if_needed(gray, config.max_image_dimension);
    let gray = enhance_grayscale_contrast(gray);
    let gray = normalize_polarity(gray);

    let preliminary = adaptive_threshold(&gray, config.threshold_radius, config.threshold_offset);
    let skew_angle = estimate_skew(&preliminary, config);

    let binary = if skew_angle == 0.0 {
        preliminary
    } else {
        let rotated = rotate_about_center(
            &gray,
            skew_angle.to_radians(),
            Interpolation::Bilinear,
            Luma([BACKGROUND]),
        );
        adaptive_threshold(&rotated, config.threshold_radius, config.threshold_offset)
    };

    tracing::debug!(
        width = binary.width(),
        height = binary.height(),
        scale,
        skew_angle,
        "Image normalized"
    );

    let transform = CoordinateTransform::new(
        scale,
        skew_angle,
        (binary.width(), binary.height()),
        (width, height),
    );

    Ok(NormalizedImage {
        image: binary,
        skew_angle,
        transform,
    })
}

/// Luminance-weighted grayscale with any alpha composited onto white.
fn to_grayscale(img: &DynamicImage) -> GrayImage {
    if !img.color().has_alpha() {
        return img.to_luma8();
    }

    let rgba = img.to_rgba8();
    let flattened = image::RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    });
    DynamicImage::ImageRgb8(flattened).to_luma8()
}

/// Resize image if it exceeds maximum dimension while maintaining aspect ratio.
///
/// Returns the image and the applied scale factor (`1.0` when untouched).
fn resize_if_needed(img: GrayImage, max_dim: u32) -> (GrayImage, f32) {
    let (width, height) = img.dimensions();

    if width <= max_dim && height <= max_dim {
        return (img, 1.0);
    }

    let ratio = if width > height {
        max_dim as f32 / width as f32
    } else {
        max_dim as f32 / height as f32
    };

    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);

    let resized = image::imageops::resize(
        &img,
        new_width,
        new_height,
        image::imageops::FilterType::Lanczos3,
    );
    (resized, new_width as f32 / width as f32)
}

/// Enhance contrast on a grayscale image using histogram stretching
///
/// Maps the darkest pixel to 0 and the lightest to 255,
/// scaling all intermediate values linearly
fn enhance_grayscale_contrast(gray: GrayImage) -> GrayImage {
    let (min_val, max_val) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    // Flat image, nothing to stretch
    if max_val <= min_val {
        return gray;
    }

    let range = (max_val - min_val) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        let normalized = (value - min_val) as f32 / range;
        Luma([(normalized * 255.0).round() as u8])
    })
}

/// Light-on-dark input: more than half of the pixels are foreground.
fn normalize_polarity(mut gray: GrayImage) -> GrayImage {
    let dark = gray.pixels().filter(|p| p[0] < INK_LEVEL).count() as u64;
    let count = gray.width() as u64 * gray.height() as u64;
    if dark * 2 > count {
        image::imageops::invert(&mut gray);
    }
    gray
}

/// Local-mean adaptive threshold.
///
/// A pixel is foreground when it is darker than the mean of the
/// `(2 * radius + 1)`-wide window around it by more than `offset`.
/// Uniform images therefore have no foreground at all.
pub fn adaptive_threshold(gray: &GrayImage, radius: u32, offset: i32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let stride = width as usize + 1;

    // Summed-area table with a zero row and column.
    let mut integral = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row_sum = 0u64;
        for x in 0..width as usize {
            row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let left = x.saturating_sub(radius) as usize;
        let top = y.saturating_sub(radius) as usize;
        let right = (x + radius + 1).min(width) as usize;
        let bottom = (y + radius + 1).min(height) as usize;

        let sum = integral[bottom * stride + right] + integral[top * stride + left]
            - integral[top * stride + right]
            - integral[bottom * stride + left];
        let count = ((right - left) * (bottom - top)) as i64;

        let value = gray.get_pixel(x, y)[0] as i64;
        if (value + offset as i64) * count < sum as i64 {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// Estimate the rotation (degrees) that levels the text lines of `binary`.
///
/// Projection-profile search: foreground pixels are projected onto the rows
/// of each candidate rotation and the angle whose row histogram is most
/// peaked wins. Returns `0.0` when the profile does not improve on the
/// unrotated one by `deskew_min_gain`, so noise images are left alone.
pub fn estimate_skew(binary: &GrayImage, config: &PreprocessingConfig) -> f32 {
    if config.deskew_max_angle <= 0.0 || config.deskew_step <= 0.0 {
        return 0.0;
    }

    let foreground: Vec<(f32, f32)> = binary
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] == FOREGROUND)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();

    if foreground.len() < MIN_SKEW_SAMPLES {
        return 0.0;
    }

    let step = foreground.len().div_ceil(MAX_SKEW_SAMPLES);
    let samples: Vec<(f32, f32)> = foreground.into_iter().step_by(step).collect();

    let cx = binary.width() as f32 / 2.0;
    let cy = binary.height() as f32 / 2.0;
    let diagonal = (cx * cx + cy * cy).sqrt();
    let bins = (2.0 * diagonal).ceil() as usize + 1;

    let profile_score = |angle_deg: f32| -> f64 {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let mut histogram = vec![0u32; bins];
        for &(x, y) in &samples {
            let rotated_y = sin * (x - cx) + cos * (y - cy) + diagonal;
            let bin = (rotated_y.max(0.0) as usize).min(bins - 1);
            histogram[bin] += 1;
        }
        histogram.iter().map(|&c| (c as f64) * (c as f64)).sum()
    };

    let baseline = profile_score(0.0);
    let steps = (config.deskew_max_angle / config.deskew_step).floor() as i32;

    let mut best_angle = 0.0f32;
    let mut best_score = baseline;
    for i in -steps..=steps {
        let angle = i as f32 * config.deskew_step;
        let score = profile_score(angle);
        // Strict comparison keeps the smallest-index angle on ties.
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    if baseline <= 0.0 || best_score < baseline * config.deskew_min_gain as f64 {
        tracing::debug!(
            best_angle,
            gain = best_score / baseline.max(1.0),
            "Skew estimate not confident, skipping rotation"
        );
        return 0.0;
    }

    best_angle
}
