use crate::{inference_service::InferenceError, prediction::Prediction, server::SharedState};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";
const ROUTE: &str = "/predict";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl PredictError {
    fn outcome(&self) -> &'static str {
        match self {
            PredictError::MissingFile => "missing_file",
            PredictError::Multipart(_) => "malformed_upload",
            PredictError::Inference(InferenceError::InvalidImage(_)) => "invalid_image",
            PredictError::Inference(_) => "internal_error",
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            PredictError::MissingFile => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "No file uploaded",
                    details: None,
                },
            ),
            PredictError::Multipart(err) => (
                err.status(),
                ErrorBody {
                    error: "Malformed upload",
                    details: Some(err.body_text()),
                },
            ),
            PredictError::Inference(InferenceError::InvalidImage(err)) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Invalid image",
                    details: Some(err.to_string()),
                },
            ),
            PredictError::Inference(err) => {
                tracing::error!("Prediction failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Internal server error",
                        details: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, PredictError> {
    let started = Instant::now();
    let result = classify_upload(&state, multipart).await;

    match &result {
        Ok(prediction) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            state.metrics.record_request(ROUTE, "ok");
            state
                .metrics
                .record_prediction(prediction.prediction, elapsed_ms);
            tracing::info!(
                "Predicted {} with confidence {:.4} in {} ms",
                prediction.prediction.as_str(),
                prediction.confidence,
                elapsed_ms
            );
        }
        Err(err) => {
            state.metrics.record_request(ROUTE, err.outcome());
            tracing::warn!("Rejected prediction request: {}", err);
        }
    }

    result.map(Json)
}

async fn classify_upload(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Prediction, PredictError> {
    // A body that is not multipart cannot carry the file field at all.
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Multipart extraction rejected: {}", rejection);
        PredictError::MissingFile
    })?;

    let image_data = read_file_field(&mut multipart)
        .await?
        .ok_or(PredictError::MissingFile)?;
    tracing::debug!("Received upload of {} bytes", image_data.len());

    Ok(state.inference_service.classify(image_data).await?)
}

/// Returns the first `file` field; other fields are skipped.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<Bytes>, PredictError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return Ok(Some(field.bytes().await?));
        }
    }
    Ok(None)
}
