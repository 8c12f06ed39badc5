use axum::Json;
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use super::handlers;
use crate::ocr::{OcrResponse, TokenEntry};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tessera OCR API",
        version = "1.0.0",
        description = "Self-hostable OCR with adaptive preprocessing and confidence-driven fallback.",
    ),
    paths(
        handlers::health::root,
        handlers::health::health_check,
        handlers::ocr::predict_ocr_system,
    ),
    components(schemas(
        handlers::health::RootResponse,
        handlers::health::HealthData,
        handlers::health::EngineStatus,
        handlers::ocr::OcrForm,
        OcrResponse,
        TokenEntry,
    )),
    tags(
        (name = "health", description = "Liveness and engine status"),
        (name = "ocr", description = "Text recognition"),
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn redoc_router<S: Clone + Send + Sync + 'static>() -> axum::Router<S> {
    Redoc::with_url("/docs", ApiDoc::openapi()).into()
}
