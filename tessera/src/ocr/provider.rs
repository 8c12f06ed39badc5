use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use image::GrayImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::{Result, TesseraError};

use super::params::RecognitionConfig;
use super::tesseract::TesseractEngine;
use super::types::{CoordinateTransform, PixelRect, TextRegion, TokenResult};

/// Text found by an engine in a single crop.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineToken {
    pub text: String,
    /// On the engine's own scale; negative or non-finite means "no confidence".
    pub confidence: f32,
    /// Relative to the crop that was recognized.
    pub bounds: PixelRect,
}

/// A text recognition engine.
///
/// `recognize` is blocking and may be slow; callers run it on the blocking
/// pool. Implementations must tolerate concurrent calls.
pub trait RecognitionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Value of a fully confident result.
    fn confidence_scale(&self) -> f32 {
        100.0
    }

    fn recognize(&self, image: &GrayImage, config: &RecognitionConfig) -> Result<Vec<EngineToken>>;
}

/// Map an engine confidence onto `[0, 1]`.
pub fn normalize_confidence(raw: f32, scale: f32) -> Option<f32> {
    if !raw.is_finite() || raw < 0.0 || !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    Some((raw / scale).clamp(0.0, 1.0))
}

#[derive(Clone)]
enum OcrBackend {
    Local { engine: Arc<dyn RecognitionEngine> },
    Unavailable { reason: String },
}

/// Runs the configured engine over text regions.
#[derive(Clone)]
pub struct OcrProvider {
    backend: OcrBackend,
    concurrency: usize,
}

impl OcrProvider {
    /// Never fails: a missing engine leaves the provider unavailable and
    /// requests are answered with 503 until the process is fixed.
    pub fn new(config: &OcrConfig) -> Self {
        let backend = match TesseractEngine::new(config) {
            Ok(engine) => OcrBackend::Local {
                engine: Arc::new(engine),
            },
            Err(e) => {
                let reason = format!("Tesseract not available: {e}");
                warn!("{}", reason);
                OcrBackend::Unavailable { reason }
            }
        };

        Self {
            backend,
            concurrency: config.region_concurrency.max(1),
        }
    }

    pub fn with_engine(engine: Arc<dyn RecognitionEngine>, concurrency: usize) -> Self {
        Self {
            backend: OcrBackend::Local { engine },
            concurrency: concurrency.max(1),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: OcrBackend::Unavailable {
                reason: reason.into(),
            },
            concurrency: 1,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, OcrBackend::Unavailable { .. })
    }

    pub fn engine_name(&self) -> Option<&str> {
        match &self.backend {
            OcrBackend::Local { engine } => Some(engine.name()),
            OcrBackend::Unavailable { .. } => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.backend {
            OcrBackend::Local { .. } => None,
            OcrBackend::Unavailable { reason } => Some(reason),
        }
    }

    /// Recognize every region and return tokens in region order.
    ///
    /// Regions are recognized concurrently on the blocking pool. Token
    /// polygons are mapped into original-image coordinates with `transform`.
    pub async fn recognize_regions(
        &self,
        regions: Vec<TextRegion>,
        config: &RecognitionConfig,
        transform: &CoordinateTransform,
        cancel: &CancellationToken,
    ) -> Result<Vec<TokenResult>> {
        let engine = match &self.backend {
            OcrBackend::Local { engine } => Arc::clone(engine),
            OcrBackend::Unavailable { reason } => {
                return Err(TesseraError::EngineUnavailable(reason.clone()))
            }
        };

        if regions.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            regions = regions.len(),
            psm = config.segmentation_mode.as_i32(),
            "Recognizing regions"
        );

        let config = Arc::new(config.clone());
        let transform = *transform;
        let scale = engine.confidence_scale();

        let work = stream::iter(regions)
            .map(|region| {
                let engine = Arc::clone(&engine);
                let config = Arc::clone(&config);
                let cancel = cancel.clone();
                async move {
                    let ordinal = region.ordinal;
                    let tokens = tokio::task::spawn_blocking(move || {
                        if cancel.is_cancelled() {
                            return Err(TesseraError::Cancelled);
                        }
                        let tokens = engine.recognize(&region.image, &config)?;
                        Ok(place_tokens(tokens, &region, &transform, scale))
                    })
                    .await??;
                    Ok::<_, TesseraError>((ordinal, tokens))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<_>>();

        let mut results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TesseraError::Cancelled),
            results = work => results?,
        };

        results.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(results.into_iter().flat_map(|(_, tokens)| tokens).collect())
    }
}

/// Normalize confidences and move token boxes from crop space to the
/// original image. Tokens without a usable box take the region's polygon.
fn place_tokens(
    tokens: Vec<EngineToken>,
    region: &TextRegion,
    transform: &CoordinateTransform,
    scale: f32,
) -> Vec<TokenResult> {
    let (width, height) = (region.image.width(), region.image.height());

    tokens
        .into_iter()
        .filter_map(|token| {
            let text = token.text.trim();
            if text.is_empty() {
                return None;
            }

            let local = PixelRect {
                left: token.bounds.left.min(width),
                top: token.bounds.top.min(height),
                right: token.bounds.right.min(width),
                bottom: token.bounds.bottom.min(height),
            };
            let polygon = if local.area() == 0 {
                region.polygon
            } else {
                transform.rect_to_polygon(&local.offset(region.bounds.left, region.bounds.top))
            };

            Some(TokenResult {
                text: text.to_string(),
                confidence: normalize_confidence(token.confidence, scale),
                region: polygon,
            })
        })
        .collect()
}
