use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum_extra::extract::QueryRejection;

use crate::error::TesseraError;

/// Multipart form whose rejections use the service's error body.
pub struct AppMultipart(pub Multipart);

impl<S> FromRequest<S> for AppMultipart
where
    S: Send + Sync,
{
    type Rejection = TesseraError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(Multipart::from_request(req, state).await?))
    }
}

/// Query string whose rejections use the service's error body.
#[derive(FromRequestParts)]
#[from_request(via(axum_extra::extract::Query), rejection(TesseraError))]
pub struct AppQuery<T>(pub T);

impl From<MultipartRejection> for TesseraError {
    fn from(rejection: MultipartRejection) -> Self {
        match rejection {
            MultipartRejection::InvalidBoundary(_) => TesseraError::Validation(
                "Expected a multipart/form-data body with an 'images' field".to_string(),
            ),
            _ => TesseraError::Validation(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for TesseraError {
    fn from(rejection: QueryRejection) -> Self {
        TesseraError::Validation(format!("Invalid query string: {rejection}"))
    }
}
