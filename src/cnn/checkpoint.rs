use ndarray::{Array1, Array2};
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid safetensors checkpoint: {0}")]
    Format(#[from] safetensors::SafeTensorError),
    #[error("Checkpoint is missing tensor `{0}`")]
    MissingTensor(String),
    #[error("Checkpoint has unexpected tensors: {0:?}")]
    UnexpectedTensors(Vec<String>),
    #[error("Tensor `{name}` has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Tensor `{name}` has dtype {dtype:?}, only F32 is supported")]
    UnsupportedDtype { name: String, dtype: Dtype },
}

/// Strict reader over a safetensors state dict: every tensor must be taken
/// exactly once with the expected shape, leftovers are reported by `finish`.
pub struct StateDict<'data> {
    tensors: SafeTensors<'data>,
    remaining: BTreeSet<String>,
}

impl<'data> StateDict<'data> {
    pub fn parse(buffer: &'data [u8]) -> Result<Self, CheckpointError> {
        let tensors = SafeTensors::deserialize(buffer)?;
        let remaining = tensors.names().into_iter().cloned().collect();
        Ok(Self { tensors, remaining })
    }

    pub fn matrix(&mut self, name: &str, shape: [usize; 2]) -> Result<Array2<f32>, CheckpointError> {
        let data = self.take(name, &shape)?;
        Array2::from_shape_vec(shape, data).map_err(|_| self.mismatch(name, &shape))
    }

    pub fn vector(&mut self, name: &str, len: usize) -> Result<Array1<f32>, CheckpointError> {
        Ok(Array1::from_vec(self.take(name, &[len])?))
    }

    /// Reads a `[out, in, k, k]` convolution kernel flattened to `out x (in * k * k)`.
    pub fn conv_kernel(
        &mut self,
        name: &str,
        shape: [usize; 4],
    ) -> Result<Array2<f32>, CheckpointError> {
        let data = self.take(name, &shape)?;
        let flat = [shape[0], shape[1] * shape[2] * shape[3]];
        Array2::from_shape_vec(flat, data).map_err(|_| self.mismatch(name, &shape))
    }

    pub fn finish(self) -> Result<(), CheckpointError> {
        if self.remaining.is_empty() {
            Ok(())
        } else {
            Err(CheckpointError::UnexpectedTensors(
                self.remaining.into_iter().collect(),
            ))
        }
    }

    fn take(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>, CheckpointError> {
        let view = self
            .tensors
            .tensor(name)
            .map_err(|_| CheckpointError::MissingTensor(name.to_string()))?;
        self.remaining.remove(name);

        if view.shape() != shape {
            return Err(CheckpointError::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: view.shape().to_vec(),
            });
        }

        read_f32(name, &view)
    }

    fn mismatch(&self, name: &str, expected: &[usize]) -> CheckpointError {
        let actual = self
            .tensors
            .tensor(name)
            .map(|view| view.shape().to_vec())
            .unwrap_or_default();
        CheckpointError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual,
        }
    }
}

fn read_f32(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>, CheckpointError> {
    if view.dtype() != Dtype::F32 {
        return Err(CheckpointError::UnsupportedDtype {
            name: name.to_string(),
            dtype: view.dtype(),
        });
    }

    Ok(view
        .data()
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}
