use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{GrayImage, ImageFormat};
use leptess::{LepTess, Variable};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::error::{Result, TesseraError};

use super::params::{parse_language_set, RecognitionConfig};
use super::provider::{EngineToken, RecognitionEngine};
use super::types::PixelRect;

/// Resolution reported to Tesseract when no `user_defined_dpi` flag is given.
const DEFAULT_DPI: i32 = 300;
/// TSV `level` of a word row.
const WORD_LEVEL: u32 = 5;

struct EngineSlot {
    languages: String,
    handle: LepTess,
}

/// Local Tesseract through leptess.
///
/// A `LepTess` handle is not reentrant, so each one sits behind its own
/// mutex. Calls take a free handle when there is one and otherwise queue on
/// a round-robin pick.
pub struct TesseractEngine {
    data_path: Option<String>,
    slots: Vec<Mutex<Option<EngineSlot>>>,
    next: AtomicUsize,
}

fn create_tesseract(data_path: Option<&str>, languages: &str) -> Result<LepTess> {
    LepTess::new(data_path, languages).map_err(|e| {
        TesseraError::EngineUnavailable(format!(
            "Tesseract could not load '{languages}': {e}"
        ))
    })
}

impl TesseractEngine {
    /// Initialise the first handle eagerly so a missing install or language
    /// pack is reported at startup.
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let data_path = config.tessdata_path().map(String::from);
        let languages = parse_language_set(&config.languages)?.join("+");
        let first = create_tesseract(data_path.as_deref(), &languages)?;

        info!(
            languages = %languages,
            profile = %config.model_profile,
            pool_size = config.pool_size.max(1),
            "Tesseract OCR initialized"
        );

        let mut slots = Vec::with_capacity(config.pool_size.max(1));
        slots.push(Mutex::new(Some(EngineSlot {
            languages,
            handle: first,
        })));
        for _ in 1..config.pool_size.max(1) {
            slots.push(Mutex::new(None));
        }

        Ok(Self {
            data_path,
            slots,
            next: AtomicUsize::new(0),
        })
    }

    fn run(&self, slot: &mut Option<EngineSlot>, image: &GrayImage, config: &RecognitionConfig) -> Result<String> {
        let languages = config.languages();
        let stale = slot.as_ref().map_or(true, |s| s.languages != languages);
        if stale {
            debug!(languages = %languages, "Initializing Tesseract handle");
            *slot = Some(EngineSlot {
                handle: create_tesseract(self.data_path.as_deref(), &languages)?,
                languages,
            });
        }
        let lt = match slot.as_mut() {
            Some(s) => &mut s.handle,
            None => return Err(TesseraError::Internal("Tesseract slot is empty".to_string())),
        };

        set_variable(
            lt,
            Variable::TesseditPagesegMode,
            &config.segmentation_mode.as_i32().to_string(),
        )?;
        // Handles are reused, so constraints are always reset.
        set_variable(
            lt,
            Variable::TesseditCharWhitelist,
            config.allow_chars.as_deref().unwrap_or(""),
        )?;
        set_variable(
            lt,
            Variable::TesseditCharBlacklist,
            config.deny_chars.as_deref().unwrap_or(""),
        )?;

        let mut dpi = DEFAULT_DPI;
        for (name, value) in &config.extra_flags {
            match name.as_str() {
                "user_defined_dpi" => match value.parse() {
                    Ok(v) => dpi = v,
                    Err(_) => warn!(value = %value, "Ignoring invalid user_defined_dpi"),
                },
                "preserve_interword_spaces" => {
                    set_variable(lt, Variable::PreserveInterwordSpaces, value)?
                }
                other => warn!(flag = %other, "Unsupported engine flag ignored"),
            }
        }

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| TesseraError::Internal(format!("Failed to encode region: {e}")))?;

        lt.set_image_from_mem(&png)
            .map_err(|e| TesseraError::Engine(format!("Failed to set image: {e}")))?;
        // Must be called after the image is set
        lt.set_source_resolution(dpi);

        lt.get_tsv_text(0)
            .map_err(|e| TesseraError::Engine(format!("Failed to read recognition result: {e}")))
    }
}

fn set_variable(lt: &mut LepTess, variable: Variable, value: &str) -> Result<()> {
    lt.set_variable(variable, value)
        .map_err(|e| TesseraError::Engine(format!("Failed to set engine variable: {e}")))
}

impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage, config: &RecognitionConfig) -> Result<Vec<EngineToken>> {
        let free = self.slots.iter().find_map(|slot| slot.try_lock().ok());
        let mut guard = match free {
            Some(guard) => guard,
            None => {
                let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
                self.slots[index].blocking_lock()
            }
        };

        let tsv = self.run(&mut guard, image, config)?;
        parse_tsv(&tsv)
    }
}

struct LineAccumulator {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    confidences: Vec<f32>,
    bounds: PixelRect,
}

/// Group Tesseract TSV word rows into line tokens.
///
/// Line confidence is the mean of the words' known confidences, or `-1`
/// when none of them has one.
pub fn parse_tsv(tsv: &str) -> Result<Vec<EngineToken>> {
    let mut lines: Vec<LineAccumulator> = Vec::new();

    for (index, row) in tsv.lines().enumerate() {
        if row.trim().is_empty() || row.starts_with("level") {
            continue;
        }

        let fields: Vec<&str> = row.splitn(12, '\t').collect();
        if fields.len() < 11 {
            return Err(TesseraError::Engine(format!(
                "Malformed TSV row {}: expected 12 columns, got {}",
                index + 1,
                fields.len()
            )));
        }

        let number = |i: usize| -> Result<u32> {
            fields[i].trim().parse::<u32>().map_err(|_| {
                TesseraError::Engine(format!(
                    "Malformed TSV row {}: column {} is not a number: '{}'",
                    index + 1,
                    i + 1,
                    fields[i]
                ))
            })
        };

        if number(0)? != WORD_LEVEL {
            continue;
        }

        let text = fields.get(11).map(|t| t.trim()).unwrap_or("");
        if text.is_empty() {
            continue;
        }

        let key = (number(1)?, number(2)?, number(3)?, number(4)?);
        let bounds = PixelRect::new(number(6)?, number(7)?, number(8)?, number(9)?);
        let confidence: f32 = fields[10].trim().parse().map_err(|_| {
            TesseraError::Engine(format!(
                "Malformed TSV row {}: confidence '{}' is not a number",
                index + 1,
                fields[10]
            ))
        })?;

        match lines.iter_mut().find(|l| l.key == key) {
            Some(line) => {
                line.words.push(text.to_string());
                if confidence >= 0.0 {
                    line.confidences.push(confidence);
                }
                line.bounds = line.bounds.union(&bounds);
            }
            None => lines.push(LineAccumulator {
                key,
                words: vec![text.to_string()],
                confidences: if confidence >= 0.0 {
                    vec![confidence]
                } else {
                    Vec::new()
                },
                bounds,
            }),
        }
    }

    Ok(lines
        .into_iter()
        .map(|line| EngineToken {
            text: line.words.join(" "),
            confidence: if line.confidences.is_empty() {
                -1.0
            } else {
                line.confidences.iter().sum::<f32>() / line.confidences.len() as f32
            },
            bounds: line.bounds,
        })
        .collect())
}
