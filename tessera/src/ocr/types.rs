//! Data carried between pipeline stages.
//!
//! Every value here is created by one stage and moved into the next; nothing
//! outlives the request that produced it.

use image::{DynamicImage, GrayImage};

/// Pixel value of foreground (ink) in a [`NormalizedImage`].
pub const FOREGROUND: u8 = 0;
/// Pixel value of background in a [`NormalizedImage`].
pub const BACKGROUND: u8 = 255;

/// Four corners, clockwise from top-left, in original-image pixels.
pub type Polygon = [[f32; 2]; 4];

/// Decoded upload, before any normalization.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl RawImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: image.color().channel_count(),
            image,
        }
    }
}

/// Axis-aligned rectangle in pixel coordinates. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        PixelRect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Rows shared by both rectangles.
    pub fn vertical_overlap(&self, other: &PixelRect) -> u32 {
        self.bottom
            .min(other.bottom)
            .saturating_sub(self.top.max(other.top))
    }

    /// Columns between the two rectangles; zero when they overlap horizontally.
    pub fn horizontal_gap(&self, other: &PixelRect) -> u32 {
        if self.right <= other.left {
            other.left - self.right
        } else if other.right <= self.left {
            self.left - other.right
        } else {
            0
        }
    }

    /// Rows between the two rectangles; zero when they overlap vertically.
    pub fn vertical_gap(&self, other: &PixelRect) -> u32 {
        if self.bottom <= other.top {
            other.top - self.bottom
        } else if other.bottom <= self.top {
            self.top - other.bottom
        } else {
            0
        }
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) as f32 / 2.0
    }

    /// Grow by `padding` on every side without leaving `width` x `height`.
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> PixelRect {
        PixelRect {
            left: self.left.saturating_sub(padding),
            top: self.top.saturating_sub(padding),
            right: (self.right + padding).min(width),
            bottom: (self.bottom + padding).min(height),
        }
    }

    pub fn offset(&self, dx: u32, dy: u32) -> PixelRect {
        PixelRect {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }
}

/// Maps points of the normalized image back onto the uploaded image.
///
/// Normalization may down-scale by `scale` and then rotate about the centre
/// by `angle_deg`; the inverse of both is applied here, and results are
/// clamped to the original bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    scale: f32,
    angle_rad: f32,
    center: (f32, f32),
    original_width: u32,
    original_height: u32,
}

impl CoordinateTransform {
    pub fn new(
        scale: f32,
        angle_deg: f32,
        normalized_size: (u32, u32),
        original_size: (u32, u32),
    ) -> Self {
        Self {
            scale,
            angle_rad: angle_deg.to_radians(),
            center: (
                normalized_size.0 as f32 / 2.0,
                normalized_size.1 as f32 / 2.0,
            ),
            original_width: original_size.0,
            original_height: original_size.1,
        }
    }

    pub fn identity(width: u32, height: u32) -> Self {
        Self::new(1.0, 0.0, (width, height), (width, height))
    }

    pub fn angle_deg(&self) -> f32 {
        self.angle_rad.to_degrees()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn original_size(&self) -> (u32, u32) {
        (self.original_width, self.original_height)
    }

    pub fn to_original(&self, x: f32, y: f32) -> [f32; 2] {
        let (cx, cy) = self.center;
        let (dx, dy) = (x - cx, y - cy);
        let (sin, cos) = (-self.angle_rad).sin_cos();
        let rx = cos * dx - sin * dy + cx;
        let ry = sin * dx + cos * dy + cy;

        let ox = rx / self.scale;
        let oy = ry / self.scale;
        [
            ox.clamp(0.0, self.original_width as f32),
            oy.clamp(0.0, self.original_height as f32),
        ]
    }

    /// Corners of a normalized-space rectangle in original coordinates.
    pub fn rect_to_polygon(&self, rect: &PixelRect) -> Polygon {
        let (l, t, r, b) = (
            rect.left as f32,
            rect.top as f32,
            rect.right as f32,
            rect.bottom as f32,
        );
        [
            self.to_original(l, t),
            self.to_original(r, t),
            self.to_original(r, b),
            self.to_original(l, b),
        ]
    }
}

/// Binarized, deskewed image. Pixels are only [`FOREGROUND`] or [`BACKGROUND`].
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    pub skew_angle: f32,
    pub transform: CoordinateTransform,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn has_foreground(&self) -> bool {
        self.image.pixels().any(|p| p[0] == FOREGROUND)
    }
}

/// One crop handed to the engine.
#[derive(Debug, Clone)]
pub struct TextRegion {
    /// Position in reading order.
    pub ordinal: usize,
    /// Bounds in normalized-image space.
    pub bounds: PixelRect,
    pub image: GrayImage,
    /// Bounds in original-image space.
    pub polygon: Polygon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenResult {
    pub text: String,
    /// In `[0, 1]`; `None` when the engine reported no confidence.
    pub confidence: Option<f32>,
    pub region: Polygon,
}

/// Outcome of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneResult {
    pub tokens: Vec<TokenResult>,
    pub aggregate: Option<f32>,
}

impl SceneResult {
    pub fn new(tokens: Vec<TokenResult>) -> Self {
        let known: Vec<f32> = tokens.iter().filter_map(|t| t.confidence).collect();
        let aggregate = if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f32>() / known.len() as f32)
        };
        Self { tokens, aggregate }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Undefined aggregates never pass.
    pub fn meets(&self, threshold: f32) -> bool {
        self.aggregate.is_some_and(|a| a >= threshold)
    }
}
