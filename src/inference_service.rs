use crate::{
    model_service::{ModelError, ModelService},
    prediction::{Prediction, PredictionError},
    preprocess::{image_to_tensor, PreprocessError},
};
use axum::body::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Image transformation error: {0}")]
    InvalidImage(#[from] PreprocessError),
    #[error("Inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("Post-processing failed: {0}")]
    Prediction(#[from] PredictionError),
    #[error("Inference task failed: {0}")]
    Task(#[from] JoinError),
}

/// Request path from uploaded bytes to a labeled prediction.
#[derive(Clone)]
pub struct InferenceService {
    model_service: Arc<dyn ModelService>,
}

impl InferenceService {
    pub fn new(model_service: Arc<dyn ModelService>) -> Self {
        Self { model_service }
    }

    pub async fn classify(&self, image_data: Bytes) -> Result<Prediction, InferenceError> {
        let model_service = self.model_service.clone();
        tokio::task::spawn_blocking(move || classify_image(model_service.as_ref(), &image_data))
            .await?
    }
}

pub fn classify_image(
    model_service: &dyn ModelService,
    image_data: &[u8],
) -> Result<Prediction, InferenceError> {
    let input = image_to_tensor(image_data)?;
    let logits = model_service.forward(input.view())?;
    if logits.nrows() != 1 {
        return Err(ModelError::OutputShape(logits.shape().to_vec()).into());
    }
    tracing::debug!("Logits: {:?}", logits.row(0).to_vec());

    Ok(Prediction::from_logits(logits.row(0))?)
}
