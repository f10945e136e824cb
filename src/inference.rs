// src/inference.rs
//
// Boundary to the external neural detector. The trait is a pure
// pass-through: raw output plus shape, no decoding. The ort-backed
// implementation lives behind the `onnx` feature so the core pipeline and
// its tests build without the ONNX Runtime present.

use crate::error::PipelineError;

/// Raw detector output as delivered by the model runtime.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl RawOutput {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// The external object-detection collaborator. `tensor` is the planar
/// S x S x 3 input from the preprocessor; failures surface as
/// `PipelineError::Inference` and are absorbed by the governor.
pub trait Detector: Send {
    fn infer(&mut self, tensor: &[f32], input_size: usize) -> Result<RawOutput, PipelineError>;
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{Detector, RawOutput};
    use crate::error::PipelineError;
    use anyhow::{Context, Result};
    use ort::{
        execution_providers::CUDAExecutionProvider,
        session::{builder::GraphOptimizationLevel, Session},
    };
    use tracing::{debug, info};

    /// ONNX Runtime session wrapping a YOLOv8-class person detector.
    pub struct OnnxDetector {
        session: Session,
    }

    impl OnnxDetector {
        pub fn new(model_path: &str) -> Result<Self> {
            info!("Loading detector model: {}", model_path);

            let session = Session::builder()?
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)
                .context("Failed to load model")?;

            info!("Detector session initialized");
            Ok(Self { session })
        }

        fn run(&mut self, tensor: &[f32], input_size: usize) -> Result<RawOutput> {
            let shape = [1usize, 3, input_size, input_size];
            let input_value = ort::value::Value::from_array((
                shape.as_slice(),
                tensor.to_vec().into_boxed_slice(),
            ))?;

            let outputs = self.session.run(ort::inputs!["images" => input_value])?;
            let output = &outputs[0];
            let (out_shape, data) = output.try_extract_tensor::<f32>()?;

            debug!("Detector output shape: {:?}", out_shape);

            Ok(RawOutput {
                data: data.to_vec(),
                shape: out_shape.iter().map(|&d| d as usize).collect(),
            })
        }
    }

    impl Detector for OnnxDetector {
        fn infer(
            &mut self,
            tensor: &[f32],
            input_size: usize,
        ) -> Result<RawOutput, PipelineError> {
            self.run(tensor, input_size)
                .map_err(|source| PipelineError::Inference { source })
        }
    }
}
