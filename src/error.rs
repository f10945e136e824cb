// src/error.rs
//
// Failure taxonomy for the analysis pipeline. Every variant is absorbed at
// the governor boundary in `pipeline::CrowdPipeline::analyze`, which always
// returns a valid (possibly degraded) FrameResult. Out-of-range ROI
// coordinates are not part of the taxonomy: they are clamped during
// preprocessing, never reported.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source frame has zero width or height; rejected before preprocessing.
    #[error("invalid frame: {width}x{height} source")]
    InvalidFrame { width: usize, height: usize },

    /// The external detector call failed. The single externally-triggerable
    /// failure point; always converted to a fallback result.
    #[error("detector inference failed: {source}")]
    Inference {
        #[source]
        source: anyhow::Error,
    },

    /// Raw detector output inconsistent with the expected `[1, 4+C, A]`
    /// layout.
    #[error("malformed detector output: {0}")]
    MalformedOutput(String),

    /// The resource monitor reported system stress before the detector ran.
    #[error("system under resource pressure")]
    ResourceExhausted,
}

impl PipelineError {
    /// Short tag used in degraded-mode risk factor entries.
    pub fn degraded_reason(&self) -> &'static str {
        match self {
            Self::InvalidFrame { .. } => "invalid frame",
            Self::Inference { .. } => "detector failure",
            Self::MalformedOutput(_) => "malformed detector output",
            Self::ResourceExhausted => "system stress",
        }
    }
}
