// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Every failure a pipeline run can end with. All of them are terminal for the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("input file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("unsupported input format for {}: {reason}", .path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("invalid video metadata: {0}")]
    InvalidMetadata(String),

    #[error("failed to open decoder for {}: {reason}", .path.display())]
    DecodeOpen { path: PathBuf, reason: String },

    #[error("failed to decode frame {frame_index}: {reason}")]
    DecodeFrame { frame_index: u64, reason: String },

    #[error("failed to open encoder for {}: {reason}", .path.display())]
    EncodeOpen { path: PathBuf, reason: String },

    #[error("failed to encode frame {frame_index}: {reason}")]
    EncodeFrame { frame_index: u64, reason: String },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True when the caller supplied something unusable, false for failures
    /// that happened while processing a valid request.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_)
                | PipelineError::EmptyFile(_)
                | PipelineError::UnsupportedFormat { .. }
                | PipelineError::InvalidConfig(_)
        )
    }

    /// Short stable name of the error kind, used in logs and JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "not_found",
            PipelineError::EmptyFile(_) => "empty_file",
            PipelineError::UnsupportedFormat { .. } => "unsupported_format",
            PipelineError::InvalidMetadata(_) => "invalid_metadata",
            PipelineError::DecodeOpen { .. } => "decode_open",
            PipelineError::DecodeFrame { .. } => "decode_frame",
            PipelineError::EncodeOpen { .. } => "encode_open",
            PipelineError::EncodeFrame { .. } => "encode_frame",
            PipelineError::ModelNotFound(_) => "model_not_found",
            PipelineError::Inference(_) => "inference",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_distinguishable_from_processing_errors() {
        let bad_input = [
            PipelineError::NotFound(PathBuf::from("a.mp4")),
            PipelineError::EmptyFile(PathBuf::from("a.mp4")),
            PipelineError::UnsupportedFormat {
                path: PathBuf::from("a.txt"),
                reason: "extension".into(),
            },
        ];
        for err in &bad_input {
            assert!(err.is_bad_input(), "{} should be bad input", err.kind());
        }

        let internal = [
            PipelineError::DecodeOpen {
                path: PathBuf::from("a.mp4"),
                reason: "codec".into(),
            },
            PipelineError::DecodeFrame {
                frame_index: 3,
                reason: "corrupt".into(),
            },
            PipelineError::EncodeOpen {
                path: PathBuf::from("out.mp4"),
                reason: "fourcc".into(),
            },
            PipelineError::InvalidMetadata("fps=0".into()),
            PipelineError::Inference("session".into()),
            PipelineError::ModelNotFound("yolov9".into()),
        ];
        for err in &internal {
            assert!(!err.is_bad_input(), "{} should be internal", err.kind());
        }
    }
}
