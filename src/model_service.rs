use crate::{
    cnn::{CheckpointError, DiscriminatorCnn},
    config::{CheckpointFormat, ModelConfig},
    ort_service::OrtModelService,
};
use ndarray::{Array2, ArrayView4};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid input shape {0:?}, expected [N, 3, 128, 128]")]
    InputShape(Vec<usize>),
    #[error("Invalid output shape {0:?}, expected [N, 2]")]
    OutputShape(Vec<usize>),
    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Forward pass of the classifier: `N x 3 x 128 x 128` normalized images to
/// `N x 2` raw logits. Implementations are read-only after construction.
pub trait ModelService: Send + Sync + 'static {
    fn forward(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, ModelError>;
}

pub fn load_model_service(config: &ModelConfig) -> Result<Arc<dyn ModelService>, ModelError> {
    let path = config.get_path();
    let format = config.checkpoint_format().map_err(ModelError::Config)?;

    let service: Arc<dyn ModelService> = match format {
        CheckpointFormat::Safetensors => Arc::new(DiscriminatorCnn::load(&path)?),
        CheckpointFormat::Onnx => Arc::new(OrtModelService::new(config)?),
    };
    tracing::info!("Model ready ({:?} backend, {:?})", format, path);

    Ok(service)
}
