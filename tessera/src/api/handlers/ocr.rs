use std::time::Duration;

use axum::extract::multipart::Multipart;
use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::api::extractors::{AppMultipart, AppQuery};
use crate::api::state::AppState;
use crate::error::{Result, TesseraError};
use crate::ocr::{OcrResponse, RecognitionParams};

/// Multipart body of `POST /predict/ocr_system`. Text fields override the
/// query string.
#[derive(Debug, utoipa::ToSchema)]
pub struct OcrForm {
    /// One or more image files.
    #[schema(value_type = Vec<String>, format = Binary)]
    pub images: Vec<Vec<u8>>,
    /// `single_char`, `single_line`, `single_block` or `auto`.
    pub mode: Option<String>,
    /// Tesseract page segmentation mode override.
    pub psm: Option<String>,
    pub whitelist: Option<String>,
    pub blacklist: Option<String>,
}

struct ParsedForm {
    images: Vec<Vec<u8>>,
    params: RecognitionParams,
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| TesseraError::Validation(format!("Invalid '{name}' field: {e}")))
}

async fn read_form(mut multipart: Multipart) -> Result<ParsedForm> {
    let mut images = Vec::new();
    let mut params = RecognitionParams::default();

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| TesseraError::Validation(format!("Failed to read form: {}", e.body_text())))?;
        let Some(field) = field else { break };

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "images" => {
                let bytes = field.bytes().await.map_err(|e| {
                    TesseraError::Validation(format!("Failed to read image: {}", e.body_text()))
                })?;
                images.push(bytes.to_vec());
            }
            "mode" => params.mode = Some(read_text(field, &name).await?),
            "psm" => params.psm = Some(read_text(field, &name).await?),
            "whitelist" => params.whitelist = Some(read_text(field, &name).await?),
            "blacklist" => params.blacklist = Some(read_text(field, &name).await?),
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(ParsedForm { images, params })
}

/// `POST /predict/ocr_system`
#[utoipa::path(
    post,
    path = "/predict/ocr_system",
    tag = "ocr",
    params(RecognitionParams),
    request_body(content = OcrForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Tokens per image in reading order", body = OcrResponse),
        (status = 400, description = "Undecodable image or invalid parameters", body = OcrResponse),
        (status = 500, description = "Recognition failed or timed out", body = OcrResponse),
        (status = 503, description = "OCR engine unavailable", body = OcrResponse),
    )
)]
pub async fn predict_ocr_system(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<RecognitionParams>,
    AppMultipart(multipart): AppMultipart,
) -> Result<Json<OcrResponse>> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("ocr_request", request_id = %request_id);

    async move {
        let ParsedForm { images, params } = read_form(multipart).await?;
        if images.is_empty() {
            return Err(TesseraError::Validation(
                "Missing 'images' field: upload at least one image".to_string(),
            ));
        }

        let request = state.pipeline.resolve(&params.or(query))?;
        info!(
            images = images.len(),
            mode = %request.mode,
            psm = request.config.segmentation_mode.as_i32(),
            "OCR request received"
        );

        // Dropping this future (client gone) cancels the token.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let timeout_secs = state.config.ocr.timeout_secs;
        let work = async {
            let mut scenes = Vec::with_capacity(images.len());
            for (index, image) in images.into_iter().enumerate() {
                let outcome = state.pipeline.run(image, &request, &cancel).await?;
                debug!(
                    image = index,
                    tokens = outcome.scene.tokens.len(),
                    fallback = outcome.fallback_ran,
                    selected = ?outcome.selected,
                    "Image recognized"
                );
                scenes.push(outcome.scene);
            }
            Ok::<_, TesseraError>(scenes)
        };

        let scenes = match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(TesseraError::Engine(format!(
                    "OCR operation timed out after {timeout_secs} seconds"
                )));
            }
        };

        Ok(Json(OcrResponse::success(&scenes)))
    }
    .instrument(span)
    .await
}
