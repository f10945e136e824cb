//! Crowd monitoring analysis pipeline.
//!
//! Turns camera frames into per-frame crowd insight: person detection over a
//! configurable region of interest, lightweight identity tracking, behavior
//! and spatial analysis, risk scoring and multi-horizon occupancy forecasts.
//! The pipeline is engineered to always produce a result; when the neural
//! detector is missing, failing or shed under resource pressure it degrades
//! to a deterministic heuristic estimator and says so in the output.
//!
//! One [`pipeline::CrowdPipeline`] per camera feed; drive it directly with
//! [`pipeline::CrowdPipeline::analyze`] or on a fixed cadence with
//! [`pipeline::AnalysisLoop`].

pub mod behavior;
pub mod config;
pub mod detection;
pub mod error;
pub mod fallback;
pub mod inference;
pub mod pipeline;
pub mod preprocessing;
pub mod risk;
pub mod tracking;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{AnalysisLoop, CrowdPipeline, FrameSource, JsonlSink, ResultSink};
pub use types::{Frame, FrameResult, RegionOfInterest, RiskLevel};

#[cfg(feature = "onnx")]
pub use inference::OnnxDetector;
