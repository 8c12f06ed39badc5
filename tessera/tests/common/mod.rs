//! Shared helpers for the integration tests: synthetic images and a
//! scripted recognition engine.

use std::io::Cursor;
use std::sync::{Mutex, Once};

use image::{GrayImage, ImageFormat, Luma};
use tessera::error::{Result, TesseraError};
use tessera::ocr::{EngineToken, PixelRect, RecognitionConfig, RecognitionEngine, SegmentationMode};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn encode_png(image: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("PNG encoding failed");
    bytes
}

pub fn blank_image(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255]))
}

/// Paint a dark rectangle.
pub fn fill(image: &mut GrayImage, left: u32, top: u32, width: u32, height: u32) {
    for y in top..(top + height).min(image.height()) {
        for x in left..(left + width).min(image.width()) {
            image.put_pixel(x, y, Luma([0]));
        }
    }
}

/// A row of `count` separate 12x16 glyph blocks, 10 px apart.
pub fn glyph_row(count: u32) -> GrayImage {
    let mut image = blank_image(40 + count * 22, 48);
    for i in 0..count {
        fill(&mut image, 20 + i * 22, 16, 12, 16);
    }
    image
}

/// A wide banner of tightly spaced glyphs on a single line.
pub fn banner(width: u32) -> GrayImage {
    let mut image = blank_image(width, 40);
    let mut x = 8;
    while x + 8 < width - 8 {
        fill(&mut image, x, 12, 6, 16);
        x += 9;
    }
    image
}

/// Three text-like lines, suitable for rotating.
pub fn page(width: u32, height: u32) -> GrayImage {
    let mut image = blank_image(width, height);
    for line in 0..3 {
        let top = 40 + line * 40;
        let mut x = 30;
        while x + 10 < width - 30 {
            fill(&mut image, x, top, 8, 14);
            x += 11;
        }
    }
    image
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub mode: SegmentationMode,
    pub allow: Option<String>,
    pub deny: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// Answers every crop with one token whose confidence depends on whether
/// the engine was asked for single characters.
pub struct ScriptedEngine {
    pub line_confidence: f32,
    pub glyph_confidence: f32,
    /// Report boxes larger than the crop.
    pub oversized_boxes: bool,
    pub fail: bool,
    calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
    pub fn new(line_confidence: f32, glyph_confidence: f32) -> Self {
        Self {
            line_confidence,
            glyph_confidence,
            oversized_boxes: false,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_in(&self, mode: SegmentationMode) -> usize {
        self.calls().iter().filter(|c| c.mode == mode).count()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image: &GrayImage, config: &RecognitionConfig) -> Result<Vec<EngineToken>> {
        self.calls.lock().unwrap().push(EngineCall {
            mode: config.segmentation_mode,
            allow: config.allow_chars.clone(),
            deny: config.deny_chars.clone(),
            width: image.width(),
            height: image.height(),
        });

        if self.fail {
            return Err(TesseraError::Engine("scripted failure".to_string()));
        }

        let (text, confidence) = if config.segmentation_mode == SegmentationMode::SingleChar {
            ("g", self.glyph_confidence)
        } else {
            ("line", self.line_confidence)
        };
        let grow = if self.oversized_boxes { 500 } else { 0 };

        Ok(vec![EngineToken {
            text: text.to_string(),
            confidence,
            bounds: PixelRect::new(0, 0, image.width() + grow, image.height() + grow),
        }])
    }
}
