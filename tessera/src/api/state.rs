use std::sync::Arc;

use crate::config::Config;
use crate::ocr::{OcrPipeline, OcrProvider};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: OcrPipeline,
}

impl AppState {
    pub fn new(config: Config, ocr: OcrProvider) -> Self {
        let config = Arc::new(config);
        let pipeline = OcrPipeline::new(ocr, Arc::clone(&config));

        Self { config, pipeline }
    }
}
