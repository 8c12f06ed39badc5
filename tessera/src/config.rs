use serde::Deserialize;
use std::env;
use std::str::FromStr;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse base engine flags.
/// Format: comma-separated `name=value` pairs, e.g. `preserve_interword_spaces=1,user_defined_dpi=300`
pub fn parse_engine_flags(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let name = parts.next()?.trim();
            let value = parts.next().map(str::trim).unwrap_or("");
            if name.is_empty() || value.is_empty() {
                tracing::warn!(
                    "Invalid engine flag '{}' in OCR_ENGINE_FLAGS, skipping",
                    pair
                );
                None
            } else {
                Some((name.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ocr: OcrConfig,
    pub preprocessing: PreprocessingConfig,
    pub segmentation: SegmentationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Which tessdata set the engine loads its models from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProfile {
    Standard,
    Best,
}

impl FromStr for ModelProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "fast" | "default" => Ok(Self::Standard),
            "best" | "high_accuracy" | "accurate" => Ok(Self::Best),
            other => Err(format!("unknown model profile '{other}'")),
        }
    }
}

impl std::fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Best => write!(f, "best"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// `+`-separated Tesseract language codes, e.g. `eng+chi_sim`.
    pub languages: String,
    pub model_profile: ModelProfile,
    pub tessdata_dir: Option<String>,
    pub tessdata_best_dir: Option<String>,
    pub engine_flags: Vec<(String, String)>,
    pub pool_size: usize,
    pub fallback_threshold: f32,
    pub region_concurrency: usize,
    pub timeout_secs: u64,
}

impl OcrConfig {
    /// Directory handed to Tesseract for the selected profile.
    ///
    /// `None` lets Tesseract use its compiled-in `TESSDATA_PREFIX`.
    pub fn tessdata_path(&self) -> Option<&str> {
        match self.model_profile {
            ModelProfile::Standard => self.tessdata_dir.as_deref(),
            ModelProfile::Best => match self.tessdata_best_dir.as_deref() {
                Some(dir) => Some(dir),
                None => {
                    tracing::warn!(
                        "OCR_MODEL_PROFILE=best but OCR_TESSDATA_BEST_DIR is unset, using standard data"
                    );
                    self.tessdata_dir.as_deref()
                }
            },
        }
    }
}

/// Image normalization tuning. Fixed per process, never tuned per image.
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessingConfig {
    pub max_image_dimension: u32,
    pub min_image_dimension: u32,
    pub deskew_max_angle: f32,
    pub deskew_step: f32,
    pub deskew_min_gain: f32,
    pub threshold_radius: u32,
    pub threshold_offset: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    pub min_component_area: u32,
    pub line_gap_factor: f32,
    pub region_padding: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: "eng".to_string(),
            model_profile: ModelProfile::Standard,
            tessdata_dir: None,
            tessdata_best_dir: None,
            engine_flags: Vec::new(),
            pool_size: 2,
            fallback_threshold: 0.5,
            region_concurrency: 4,
            timeout_secs: 60,
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: 4096,
            min_image_dimension: 8,
            deskew_max_angle: 15.0,
            deskew_step: 0.5,
            deskew_min_gain: 1.1,
            threshold_radius: 15,
            threshold_offset: 10,
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_component_area: 4,
            line_gap_factor: 1.5,
            region_padding: 4,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let server = ServerConfig::default();
        let ocr = OcrConfig::default();
        let preprocessing = PreprocessingConfig::default();
        let segmentation = SegmentationConfig::default();

        Self {
            server: ServerConfig {
                host: env::var("TESSERA_HOST").unwrap_or(server.host),
                port: parse_env_or("TESSERA_PORT", server.port),
                max_upload_bytes: parse_env_or("OCR_MAX_UPLOAD_BYTES", server.max_upload_bytes),
            },
            ocr: OcrConfig {
                languages: env::var("OCR_LANGUAGES").unwrap_or(ocr.languages),
                model_profile: parse_env_or("OCR_MODEL_PROFILE", ocr.model_profile),
                tessdata_dir: parse_env_opt("OCR_TESSDATA_DIR"),
                tessdata_best_dir: parse_env_opt("OCR_TESSDATA_BEST_DIR"),
                engine_flags: env::var("OCR_ENGINE_FLAGS")
                    .map(|raw| parse_engine_flags(&raw))
                    .unwrap_or_default(),
                pool_size: parse_env_or("OCR_ENGINE_POOL_SIZE", ocr.pool_size).max(1),
                fallback_threshold: parse_env_or("OCR_FALLBACK_THRESHOLD", ocr.fallback_threshold),
                region_concurrency: parse_env_or("OCR_REGION_CONCURRENCY", ocr.region_concurrency)
                    .max(1),
                timeout_secs: parse_env_or("OCR_TIMEOUT", ocr.timeout_secs),
            },
            preprocessing: PreprocessingConfig {
                max_image_dimension: parse_env_or(
                    "OCR_MAX_DIMENSION",
                    preprocessing.max_image_dimension,
                ),
                min_image_dimension: parse_env_or(
                    "OCR_MIN_DIMENSION",
                    preprocessing.min_image_dimension,
                ),
                deskew_max_angle: parse_env_or(
                    "OCR_DESKEW_MAX_ANGLE",
                    preprocessing.deskew_max_angle,
                ),
                deskew_step: parse_env_or("OCR_DESKEW_STEP", preprocessing.deskew_step),
                deskew_min_gain: parse_env_or("OCR_DESKEW_MIN_GAIN", preprocessing.deskew_min_gain),
                threshold_radius: parse_env_or(
                    "OCR_THRESHOLD_RADIUS",
                    preprocessing.threshold_radius,
                ),
                threshold_offset: parse_env_or(
                    "OCR_THRESHOLD_OFFSET",
                    preprocessing.threshold_offset,
                ),
            },
            segmentation: SegmentationConfig {
                min_component_area: parse_env_or(
                    "OCR_MIN_COMPONENT_AREA",
                    segmentation.min_component_area,
                ),
                line_gap_factor: parse_env_or("OCR_LINE_GAP_FACTOR", segmentation.line_gap_factor),
                region_padding: parse_env_or("OCR_REGION_PADDING", segmentation.region_padding),
            },
        }
    }
}
