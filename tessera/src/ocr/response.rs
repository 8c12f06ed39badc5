//! Wire format of recognition results.

use serde::{Deserialize, Serialize};

use super::types::{Polygon, SceneResult, TokenResult};

pub const SUCCESS_MESSAGE: &str = "Success";

/// One recognized token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TokenEntry {
    /// Normalized to `[0, 1]`; `null` when the engine reported none.
    pub confidence: Option<f32>,
    pub text: String,
    /// Four `[x, y]` corners in original-image pixels, clockwise from top-left.
    #[schema(value_type = Vec<Vec<f32>>)]
    pub text_region: Polygon,
}

/// Body of `POST /predict/ocr_system`: one token list per submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OcrResponse {
    pub msg: String,
    pub results: Vec<Vec<TokenEntry>>,
}

impl OcrResponse {
    pub fn success(scenes: &[SceneResult]) -> Self {
        Self {
            msg: SUCCESS_MESSAGE.to_string(),
            results: scenes.iter().map(assemble).collect(),
        }
    }
}

/// Tokens of one scene in reading order.
pub fn assemble(scene: &SceneResult) -> Vec<TokenEntry> {
    scene.tokens.iter().map(entry).collect()
}

fn entry(token: &TokenResult) -> TokenEntry {
    TokenEntry {
        confidence: token.confidence,
        text: token.text.clone(),
        text_region: token.region.map(|[x, y]| [round2(x), round2(y)]),
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
