use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, TesseraError};

use super::params::{resolve, RecognitionConfig, RecognitionParams, ResolvedRequest, ScenarioMode, SegmentationMode};
use super::preprocessing::{decode_image, normalize};
use super::provider::OcrProvider;
use super::segmentation::{segment, Segmentation};
use super::types::{NormalizedImage, SceneResult};

/// Which recognition attempt produced the accepted result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutcome {
    pub scene: SceneResult,
    pub fallback_ran: bool,
    pub selected: Attempt,
}

impl RecognitionOutcome {
    fn initial(scene: SceneResult) -> Self {
        Self {
            scene,
            fallback_ran: false,
            selected: Attempt::Initial,
        }
    }
}

/// Decode, normalize, segment and recognize one image, retrying once in
/// single-glyph mode when the first attempt is not confident enough.
#[derive(Clone)]
pub struct OcrPipeline {
    provider: OcrProvider,
    config: Arc<Config>,
}

impl OcrPipeline {
    pub fn new(provider: OcrProvider, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &OcrProvider {
        &self.provider
    }

    /// Validate caller parameters. Fails before any image work is done.
    pub fn resolve(&self, params: &RecognitionParams) -> Result<ResolvedRequest> {
        resolve(params, &self.config.ocr)
    }

    pub async fn run(
        &self,
        image: Vec<u8>,
        request: &ResolvedRequest,
        cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome> {
        let preprocessing = self.config.preprocessing.clone();
        let normalized = tokio::task::spawn_blocking(move || {
            let raw = decode_image(&image)?;
            debug!(
                width = raw.width,
                height = raw.height,
                channels = raw.channels,
                "Image decoded"
            );
            normalize(&raw, &preprocessing)
        })
        .await??;

        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        if !normalized.has_foreground() {
            info!("No foreground found, returning empty result");
            return Ok(RecognitionOutcome::initial(SceneResult::empty()));
        }

        let normalized = Arc::new(normalized);
        let threshold = self.config.ocr.fallback_threshold;

        let initial = self
            .attempt(&normalized, request.mode.segmentation(), &request.config, cancel)
            .await?;

        if initial.meets(threshold) {
            info!(
                tokens = initial.tokens.len(),
                aggregate = ?initial.aggregate,
                "Initial attempt accepted"
            );
            return Ok(RecognitionOutcome::initial(initial));
        }

        if request.mode == ScenarioMode::SingleChar {
            info!(
                aggregate = ?initial.aggregate,
                threshold,
                "Low confidence in single_char mode, no fallback"
            );
            return Ok(RecognitionOutcome::initial(initial));
        }

        info!(
            aggregate = ?initial.aggregate,
            threshold,
            "Low confidence, retrying in single-glyph mode"
        );
        let fallback_config = request
            .config
            .with_segmentation_mode(SegmentationMode::SingleChar);
        let fallback = self
            .attempt(&normalized, Segmentation::Glyphs, &fallback_config, cancel)
            .await?;

        let selected = if improves(fallback.aggregate, initial.aggregate) {
            Attempt::Fallback
        } else {
            Attempt::Initial
        };

        info!(
            initial = ?initial.aggregate,
            fallback = ?fallback.aggregate,
            selected = ?selected,
            "Fallback decision"
        );

        Ok(RecognitionOutcome {
            scene: match selected {
                Attempt::Initial => initial,
                Attempt::Fallback => fallback,
            },
            fallback_ran: true,
            selected,
        })
    }

    async fn attempt(
        &self,
        normalized: &Arc<NormalizedImage>,
        strategy: Segmentation,
        config: &RecognitionConfig,
        cancel: &CancellationToken,
    ) -> Result<SceneResult> {
        let image = Arc::clone(normalized);
        let segmentation = self.config.segmentation.clone();
        let regions =
            tokio::task::spawn_blocking(move || segment(&image, strategy, &segmentation)).await?;

        if regions.is_empty() {
            return Ok(SceneResult::empty());
        }

        let tokens = self
            .provider
            .recognize_regions(regions, config, &normalized.transform, cancel)
            .await?;
        Ok(SceneResult::new(tokens))
    }
}

/// An undefined aggregate ranks below every defined one.
fn improves(candidate: Option<f32>, current: Option<f32>) -> bool {
    match (candidate, current) {
        (Some(b), Some(a)) => b > a,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
