//! OCR (Optical Character Recognition) Module
//!
//! Turns an uploaded image into positioned text tokens.
//!
//! # Architecture
//!
//! A request flows through these stages:
//! - `preprocessing` decodes the upload, converts it to grayscale, limits its
//!   size, corrects skew and binarizes it
//! - `segmentation` cuts the normalized image into text regions
//! - `params` resolves caller parameters into an engine configuration
//! - `provider` runs a [`RecognitionEngine`] over the regions concurrently and
//!   maps results back to original coordinates
//! - `pipeline` accepts the first attempt or retries once in single-glyph mode
//! - `response` builds the JSON body
//!
//! `tesseract` is the local engine, backed by leptess.
//!
//! # Usage
//!
//! ```rust,ignore
//! let pipeline = OcrPipeline::new(OcrProvider::new(&config.ocr), Arc::new(config));
//! let request = pipeline.resolve(&params)?;
//! let outcome = pipeline.run(image_bytes, &request, &cancel).await?;
//! ```

pub mod params;
pub mod pipeline;
pub mod preprocessing;
pub mod provider;
pub mod response;
pub mod segmentation;
pub mod tesseract;
pub mod types;

pub use params::{RecognitionConfig, RecognitionParams, ScenarioMode, SegmentationMode};
pub use pipeline::{Attempt, OcrPipeline, RecognitionOutcome};
pub use provider::{EngineToken, OcrProvider, RecognitionEngine};
pub use response::{OcrResponse, TokenEntry};
pub use types::{PixelRect, SceneResult, TokenResult};
