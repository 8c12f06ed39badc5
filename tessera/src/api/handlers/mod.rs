pub(crate) mod health;
pub mod ocr;

pub use health::{health_check, root};
pub use ocr::predict_ocr_system;
