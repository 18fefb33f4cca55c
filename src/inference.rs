// src/inference.rs

use crate::error::{PipelineError, Result};
use crate::types::{Device, ModelConfig};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, info};

/// One ONNX Runtime session fed with a single `[1, 3, size, size]` image tensor.
pub struct OnnxSession {
    session: Session,
    input_name: String,
}

impl OnnxSession {
    pub fn new(model_path: &Path, config: &ModelConfig) -> Result<Self> {
        info!("Loading ONNX model: {}", model_path.display());

        let mut builder = Session::builder().map_err(|e| load_error(model_path, e))?;

        if config.device != Device::Cpu {
            info!("Enabling CUDA execution provider");
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])
                .map_err(|e| load_error(model_path, e))?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(model_path, e))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| load_error(model_path, e))?
            .commit_from_file(model_path)
            .map_err(|e| load_error(model_path, e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!("✓ Session ready (input tensor {:?})", input_name);

        Ok(Self {
            session,
            input_name,
        })
    }

    /// Returns the first output's shape and flattened data.
    pub fn run(&mut self, input: Vec<f32>, size: usize) -> Result<(Vec<i64>, Vec<f32>)> {
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Tensor::from_array((shape.as_slice(), input.into_boxed_slice()))
                .map_err(run_error)?;

        let name = self.input_name.clone();
        let outputs = self
            .session
            .run(ort::inputs![name => input_value])
            .map_err(run_error)?;

        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(run_error)?;
        debug!("Model output shape: {:?}", output_shape);

        Ok((output_shape.to_vec(), data.to_vec()))
    }
}

fn load_error(path: &Path, err: impl Display) -> PipelineError {
    PipelineError::ModelNotFound(format!("failed to load {}: {}", path.display(), err))
}

fn run_error(err: impl Display) -> PipelineError {
    PipelineError::Inference(err.to_string())
}
