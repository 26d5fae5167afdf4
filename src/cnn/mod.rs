mod checkpoint;
mod layers;

pub use checkpoint::CheckpointError;

use crate::{
    model_service::{ModelError, ModelService},
    prediction::NUM_CLASSES,
    preprocess::{INPUT_CHANNELS, INPUT_SIZE},
};
use checkpoint::StateDict;
use layers::{max_pool2, relu_inplace, Conv2d, Linear};
use ndarray::{Array2, ArrayView4, Axis};
use std::path::Path;

const KERNEL_SIZE: usize = 3;
const CONV_CHANNELS: [usize; 3] = [32, 64, 128];
const HIDDEN_UNITS: usize = 256;
const FEATURE_SIZE: usize = INPUT_SIZE / 8;
const FLAT_FEATURES: usize = CONV_CHANNELS[2] * FEATURE_SIZE * FEATURE_SIZE;

const _: () = assert!(INPUT_SIZE % 8 == 0);
const _: () = assert!(FLAT_FEATURES == 128 * 16 * 16);

#[derive(Debug, Clone)]
pub struct DiscriminatorCnn {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    fc1: Linear,
    fc2: Linear,
}

impl DiscriminatorCnn {
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let buffer = std::fs::read(path)?;
        let model = Self::from_safetensors(&buffer)?;
        tracing::info!("Loaded discriminator checkpoint from {:?}", path);
        Ok(model)
    }

    pub fn from_safetensors(buffer: &[u8]) -> Result<Self, CheckpointError> {
        let mut state = StateDict::parse(buffer)?;

        let conv1 = load_conv(&mut state, "conv1", INPUT_CHANNELS, CONV_CHANNELS[0])?;
        let conv2 = load_conv(&mut state, "conv2", CONV_CHANNELS[0], CONV_CHANNELS[1])?;
        let conv3 = load_conv(&mut state, "conv3", CONV_CHANNELS[1], CONV_CHANNELS[2])?;
        let fc1 = Linear::new(
            state.matrix("fc1.weight", [HIDDEN_UNITS, FLAT_FEATURES])?,
            state.vector("fc1.bias", HIDDEN_UNITS)?,
        );
        let fc2 = Linear::new(
            state.matrix("fc2.weight", [NUM_CLASSES, HIDDEN_UNITS])?,
            state.vector("fc2.bias", NUM_CLASSES)?,
        );
        state.finish()?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            fc1,
            fc2,
        })
    }

    pub fn forward(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        let (_, channels, height, width) = input.dim();
        if (channels, height, width) != (INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE) {
            return Err(ModelError::InputShape(input.shape().to_vec()));
        }

        let mut logits = Array2::zeros((input.len_of(Axis(0)), NUM_CLASSES));
        for (image, mut row) in input.axis_iter(Axis(0)).zip(logits.rows_mut()) {
            let mut x = image.to_owned();
            for conv in [&self.conv1, &self.conv2, &self.conv3] {
                let mut activation = conv.forward(x.view())?;
                relu_inplace(&mut activation);
                x = max_pool2(activation.view());
            }

            let flat = x.into_shape_with_order(FLAT_FEATURES)?;
            let mut hidden = self.fc1.forward(flat.view());
            relu_inplace(&mut hidden);
            row.assign(&self.fc2.forward(hidden.view()));
        }

        Ok(logits)
    }
}

fn load_conv(
    state: &mut StateDict<'_>,
    name: &str,
    in_channels: usize,
    out_channels: usize,
) -> Result<Conv2d, CheckpointError> {
    let weight = state.conv_kernel(
        &format!("{name}.weight"),
        [out_channels, in_channels, KERNEL_SIZE, KERNEL_SIZE],
    )?;
    let bias = state.vector(&format!("{name}.bias"), out_channels)?;
    Ok(Conv2d::new(weight, bias, in_channels, KERNEL_SIZE))
}

impl ModelService for DiscriminatorCnn {
    fn forward(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        DiscriminatorCnn::forward(self, input)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array4;
    use safetensors::{tensor::TensorView, Dtype};
    use std::collections::HashMap;

    pub(crate) fn state_dict_shapes() -> Vec<(String, Vec<usize>)> {
        vec![
            ("conv1.weight".into(), vec![32, 3, 3, 3]),
            ("conv1.bias".into(), vec![32]),
            ("conv2.weight".into(), vec![64, 32, 3, 3]),
            ("conv2.bias".into(), vec![64]),
            ("conv3.weight".into(), vec![128, 64, 3, 3]),
            ("conv3.bias".into(), vec![128]),
            ("fc1.weight".into(), vec![256, 128 * 16 * 16]),
            ("fc1.bias".into(), vec![256]),
            ("fc2.weight".into(), vec![2, 256]),
            ("fc2.bias".into(), vec![2]),
        ]
    }

    /// Serializes `(name, shape, values)` triples as a safetensors buffer.
    pub(crate) fn serialize(tensors: &[(String, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
        let bytes: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
            .iter()
            .map(|(name, shape, values)| {
                let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name.clone(), shape.clone(), data)
            })
            .collect();
        let views: HashMap<String, TensorView<'_>> = bytes
            .iter()
            .map(|(name, shape, data)| {
                (
                    name.clone(),
                    TensorView::new(Dtype::F32, shape.clone(), data).unwrap(),
                )
            })
            .collect();
        safetensors::serialize(&views, &None).unwrap()
    }

    /// Small deterministic weights so activations stay well inside f32 range.
    pub(crate) fn synthetic_checkpoint() -> Vec<u8> {
        let tensors: Vec<_> = state_dict_shapes()
            .into_iter()
            .enumerate()
            .map(|(t, (name, shape))| {
                let len: usize = shape.iter().product();
                let values = (0..len)
                    .map(|i| ((i * 31 + t * 17) % 97) as f32 / 97.0 - 0.5)
                    .map(|v| v * 0.05)
                    .collect();
                (name, shape, values)
            })
            .collect();
        serialize(&tensors)
    }

    /// All weights zero and a fixed output bias, so logits equal `fc2_bias`.
    pub(crate) fn constant_checkpoint(fc2_bias: [f32; 2]) -> Vec<u8> {
        let tensors: Vec<_> = state_dict_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                let values = if name == "fc2.bias" {
                    fc2_bias.to_vec()
                } else {
                    vec![0.0; len]
                };
                (name, shape, values)
            })
            .collect();
        serialize(&tensors)
    }

    fn sample_input(batch: usize) -> Array4<f32> {
        Array4::from_shape_fn((batch, 3, 128, 128), |(n, c, y, x)| {
            (((n + 1) * (c * 7 + y * 3 + x)) % 255) as f32 / 127.5 - 1.0
        })
    }

    #[test]
    fn test_forward_produces_two_logits_per_image() {
        let model = DiscriminatorCnn::from_safetensors(&synthetic_checkpoint()).unwrap();

        let logits = model.forward(sample_input(2).view()).unwrap();

        assert_eq!(logits.shape(), &[2, 2]);
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let model = DiscriminatorCnn::from_safetensors(&synthetic_checkpoint()).unwrap();
        let input = sample_input(1);

        let first = model.forward(input.view()).unwrap();
        let second = model.forward(input.view()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_rows_match_single_image_forward() {
        let model = DiscriminatorCnn::from_safetensors(&synthetic_checkpoint()).unwrap();
        let batch = sample_input(2);

        let batched = model.forward(batch.view()).unwrap();
        let single = model
            .forward(batch.slice(ndarray::s![1..2, .., .., ..]))
            .unwrap();

        assert_eq!(batched.row(1), single.row(0));
    }

    #[test]
    fn test_zero_weights_yield_output_bias() {
        let model = DiscriminatorCnn::from_safetensors(&constant_checkpoint([1.5, -2.0])).unwrap();

        let logits = model.forward(sample_input(1).view()).unwrap();

        assert_eq!(logits.row(0).to_vec(), vec![1.5f32, -2.0]);
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let model = DiscriminatorCnn::from_safetensors(&constant_checkpoint([0.0, 0.0])).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 32, 32));

        let result = model.forward(input.view());

        assert!(matches!(result, Err(ModelError::InputShape(shape)) if shape == vec![1, 3, 32, 32]));
    }

    #[test]
    fn test_rejects_missing_tensor() {
        let tensors: Vec<_> = state_dict_shapes()
            .into_iter()
            .filter(|(name, _)| name != "fc1.bias")
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                (name, shape, vec![0.0; len])
            })
            .collect();

        let result = DiscriminatorCnn::from_safetensors(&serialize(&tensors));

        assert!(matches!(result, Err(CheckpointError::MissingTensor(name)) if name == "fc1.bias"));
    }

    #[test]
    fn test_rejects_checkpoint_sized_for_other_resolution() {
        // fc1 sized for 32x32 inputs (128 * 4 * 4 features).
        let tensors: Vec<_> = state_dict_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let shape = if name == "fc1.weight" {
                    vec![256, 128 * 4 * 4]
                } else {
                    shape
                };
                let len: usize = shape.iter().product();
                (name, shape, vec![0.0; len])
            })
            .collect();

        let result = DiscriminatorCnn::from_safetensors(&serialize(&tensors));

        assert!(matches!(
            result,
            Err(CheckpointError::ShapeMismatch { name, .. }) if name == "fc1.weight"
        ));
    }

    #[test]
    fn test_rejects_unexpected_tensor() {
        let mut tensors: Vec<_> = state_dict_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                (name, shape, vec![0.0; len])
            })
            .collect();
        tensors.push(("fc3.weight".into(), vec![2, 2], vec![0.0; 4]));

        let result = DiscriminatorCnn::from_safetensors(&serialize(&tensors));

        assert!(matches!(
            result,
            Err(CheckpointError::UnexpectedTensors(names)) if names == vec!["fc3.weight".to_string()]
        ));
    }

    #[test]
    fn test_rejects_non_f32_tensor() {
        let mut buffers: Vec<(String, Vec<usize>, Vec<u8>)> = state_dict_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                (name, shape, vec![0u8; len * 4])
            })
            .collect();
        let fc2_bias = buffers.iter_mut().find(|(name, _, _)| name == "fc2.bias").unwrap();
        fc2_bias.2 = vec![0u8; 2 * 8];
        let views: HashMap<String, TensorView<'_>> = buffers
            .iter()
            .map(|(name, shape, data)| {
                let dtype = if name == "fc2.bias" { Dtype::F64 } else { Dtype::F32 };
                (name.clone(), TensorView::new(dtype, shape.clone(), data).unwrap())
            })
            .collect();
        let buffer = safetensors::serialize(&views, &None).unwrap();

        let result = DiscriminatorCnn::from_safetensors(&buffer);

        assert!(matches!(result, Err(CheckpointError::UnsupportedDtype { .. })));
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let result = DiscriminatorCnn::from_safetensors(b"not a checkpoint");

        assert!(matches!(result, Err(CheckpointError::Format(_))));
    }
}
