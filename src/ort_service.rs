use crate::{
    config::ModelConfig,
    model_service::{ModelError, ModelService},
    prediction::NUM_CLASSES,
    preprocess::{INPUT_CHANNELS, INPUT_SIZE},
};
use ndarray::{Array2, Array4, ArrayView4, Ix2};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        ort::init().with_name("image_classifier").commit()?;

        let sessions = (0..model_config.num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", sessions.len());

        let service = Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            output_name: model_config.output_name.clone(),
        };
        service.check_architecture()?;

        Ok(service)
    }

    fn check_architecture(&self) -> Result<(), ModelError> {
        let probe = Array4::<f32>::zeros((1, INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE));
        let logits = self.run_inference(probe.view())?;
        if logits.shape() != &[1, NUM_CLASSES] {
            return Err(ModelError::OutputShape(logits.shape().to_vec()));
        }
        Ok(())
    }

    pub fn run_inference(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())?;
        let dims = array.shape().to_vec();
        let logits = array
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::OutputShape(dims))?;

        Ok(logits)
    }
}

impl ModelService for OrtModelService {
    fn forward(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        let (_, channels, height, width) = input.dim();
        if (channels, height, width) != (INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE) {
            return Err(ModelError::InputShape(input.shape().to_vec()));
        }

        let logits = self.run_inference(input)?;
        if logits.shape() != &[input.len_of(ndarray::Axis(0)), NUM_CLASSES] {
            return Err(ModelError::OutputShape(logits.shape().to_vec()));
        }
        Ok(logits)
    }
}
