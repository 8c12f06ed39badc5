//! Request parameters to engine configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{Result, TesseraError};

use super::segmentation::Segmentation;

/// Characters that would break out of an engine configuration string.
const CONFIG_METACHARACTERS: &[char] = &['"', '\'', '`', '\\', '$', ';', '|', '&', '<', '>', '=', '#'];

/// Caller-facing hint about the shape of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioMode {
    SingleChar,
    SingleLine,
    SingleBlock,
    #[default]
    Auto,
}

impl ScenarioMode {
    pub fn segmentation(&self) -> Segmentation {
        match self {
            ScenarioMode::SingleChar => Segmentation::LargestGlyph,
            ScenarioMode::SingleLine => Segmentation::WholeImage,
            ScenarioMode::SingleBlock | ScenarioMode::Auto => Segmentation::Lines,
        }
    }

    pub fn default_segmentation_mode(&self) -> SegmentationMode {
        match self {
            ScenarioMode::SingleChar => SegmentationMode::SingleChar,
            ScenarioMode::SingleLine => SegmentationMode::SingleLine,
            ScenarioMode::SingleBlock => SegmentationMode::SingleBlock,
            ScenarioMode::Auto => SegmentationMode::Auto,
        }
    }
}

impl FromStr for ScenarioMode {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single_char" => Ok(Self::SingleChar),
            "single_line" => Ok(Self::SingleLine),
            "single_block" => Ok(Self::SingleBlock),
            "auto" | "" => Ok(Self::Auto),
            other => Err(TesseraError::Config(format!(
                "Unknown mode '{other}', expected one of single_char, single_line, single_block, auto"
            ))),
        }
    }
}

impl std::fmt::Display for ScenarioMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleChar => write!(f, "single_char"),
            Self::SingleLine => write!(f, "single_line"),
            Self::SingleBlock => write!(f, "single_block"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Tesseract page segmentation modes (`--psm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationMode {
    OsdOnly = 0,
    AutoOsd = 1,
    AutoOnly = 2,
    Auto = 3,
    SingleColumn = 4,
    SingleBlockVertText = 5,
    SingleBlock = 6,
    SingleLine = 7,
    SingleWord = 8,
    CircleWord = 9,
    SingleChar = 10,
    SparseText = 11,
    SparseTextOsd = 12,
    RawLine = 13,
}

impl SegmentationMode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Modes that analyse layout without recognizing any text.
    pub fn recognizes_text(&self) -> bool {
        !matches!(self, Self::OsdOnly | Self::AutoOnly)
    }
}

impl TryFrom<i32> for SegmentationMode {
    type Error = TesseraError;

    fn try_from(value: i32) -> Result<Self> {
        let mode = match value {
            0 => Self::OsdOnly,
            1 => Self::AutoOsd,
            2 => Self::AutoOnly,
            3 => Self::Auto,
            4 => Self::SingleColumn,
            5 => Self::SingleBlockVertText,
            6 => Self::SingleBlock,
            7 => Self::SingleLine,
            8 => Self::SingleWord,
            9 => Self::CircleWord,
            10 => Self::SingleChar,
            11 => Self::SparseText,
            12 => Self::SparseTextOsd,
            13 => Self::RawLine,
            other => {
                return Err(TesseraError::Config(format!(
                    "psm must be between 0 and 13, got {other}"
                )))
            }
        };
        Ok(mode)
    }
}

impl FromStr for SegmentationMode {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        let value: i32 = s
            .trim()
            .parse()
            .map_err(|_| TesseraError::Config(format!("psm must be an integer, got '{s}'")))?;
        let mode = Self::try_from(value)?;
        if !mode.recognizes_text() {
            return Err(TesseraError::Config(format!(
                "psm {value} performs layout analysis only and recognizes no text"
            )));
        }
        Ok(mode)
    }
}

/// Concrete engine settings for one recognition attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    pub segmentation_mode: SegmentationMode,
    pub language_set: Vec<String>,
    pub allow_chars: Option<String>,
    pub deny_chars: Option<String>,
    pub extra_flags: Vec<(String, String)>,
}

impl RecognitionConfig {
    /// Language set in Tesseract's `eng+deu` form.
    pub fn languages(&self) -> String {
        self.language_set.join("+")
    }

    /// Same constraints with a different segmentation mode.
    pub fn with_segmentation_mode(&self, mode: SegmentationMode) -> Self {
        Self {
            segmentation_mode: mode,
            ..self.clone()
        }
    }
}

/// Raw caller parameters, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecognitionParams {
    /// `single_char`, `single_line`, `single_block` or `auto` (default).
    pub mode: Option<String>,
    /// Explicit Tesseract page segmentation mode, overrides `mode`.
    pub psm: Option<String>,
    /// Characters the engine may output.
    pub whitelist: Option<String>,
    /// Characters the engine must not output.
    pub blacklist: Option<String>,
}

impl RecognitionParams {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: RecognitionParams) -> Self {
        Self {
            mode: self.mode.or(fallback.mode),
            psm: self.psm.or(fallback.psm),
            whitelist: self.whitelist.or(fallback.whitelist),
            blacklist: self.blacklist.or(fallback.blacklist),
        }
    }
}

/// Validated request: the scenario mode plus the engine configuration it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub mode: ScenarioMode,
    pub config: RecognitionConfig,
}

/// Resolve caller parameters against the process configuration.
pub fn resolve(params: &RecognitionParams, ocr: &OcrConfig) -> Result<ResolvedRequest> {
    let mode = match params.mode.as_deref() {
        Some(raw) => raw.parse::<ScenarioMode>()?,
        None => ScenarioMode::default(),
    };

    let override_mode = params
        .psm
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(str::parse::<SegmentationMode>)
        .transpose()?;

    let config = resolve_config(
        mode,
        override_mode,
        params.whitelist.as_deref(),
        params.blacklist.as_deref(),
        ocr,
    )?;

    Ok(ResolvedRequest { mode, config })
}

/// An explicit engine mode wins over the scenario mode's default.
pub fn resolve_config(
    mode: ScenarioMode,
    override_mode: Option<SegmentationMode>,
    allow: Option<&str>,
    deny: Option<&str>,
    ocr: &OcrConfig,
) -> Result<RecognitionConfig> {
    let language_set = parse_language_set(&ocr.languages)?;
    let (allow_chars, deny_chars) = sanitize_char_sets(allow, deny);

    Ok(RecognitionConfig {
        segmentation_mode: override_mode.unwrap_or_else(|| mode.default_segmentation_mode()),
        language_set,
        allow_chars,
        deny_chars,
        extra_flags: ocr.engine_flags.clone(),
    })
}

pub(crate) fn parse_language_set(raw: &str) -> Result<Vec<String>> {
    let languages: Vec<String> = raw
        .split(['+', ','])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

    if languages.is_empty() {
        return Err(TesseraError::Config(
            "Language set is empty; set OCR_LANGUAGES (e.g. 'eng')".to_string(),
        ));
    }
    Ok(languages)
}

/// Drop control characters, whitespace and config-string metacharacters,
/// de-duplicating in first-seen order.
pub fn sanitize_chars(raw: &str) -> String {
    let mut seen = Vec::new();
    for c in raw.chars() {
        if c.is_control() || c.is_whitespace() || CONFIG_METACHARACTERS.contains(&c) {
            continue;
        }
        if !seen.contains(&c) {
            seen.push(c);
        }
    }
    seen.into_iter().collect()
}

/// Sanitize both lists and remove denied characters from the allow list.
///
/// Never fails: an allow list emptied by sanitization means "no constraint".
pub fn sanitize_char_sets(
    allow: Option<&str>,
    deny: Option<&str>,
) -> (Option<String>, Option<String>) {
    let allow_raw = allow;
    let deny = deny.map(sanitize_chars).filter(|d| !d.is_empty());
    let allow = allow
        .map(sanitize_chars)
        .map(|a| match &deny {
            Some(d) => a.chars().filter(|c| !d.contains(*c)).collect::<String>(),
            None => a,
        })
        .filter(|a| !a.is_empty());

    if let (None, Some(requested)) = (&allow, allow_raw.filter(|a| !a.trim().is_empty())) {
        debug!(
            requested = %requested,
            deny = deny.as_deref().unwrap_or(""),
            "Allow list is empty after sanitization, recognition is unconstrained"
        );
    }
    (allow, deny)
}
