// src/lib.rs

pub mod annotator;
pub mod config;
pub mod error;
pub mod inference;
pub mod person_detection;
pub mod pipeline;
pub mod preprocessing;
pub mod sliced_inference;
pub mod tiling;
pub mod types;
pub mod video_processor;

pub use annotator::Annotator;
pub use error::{PipelineError, Result};
pub use person_detection::{Detection, Detector, ModelKind, PersonDetector};
pub use pipeline::{InferencePipeline, PipelineState, RunReport};
pub use sliced_inference::SlicedInferenceEngine;
pub use tiling::{Tile, TileGrid};
pub use types::{Config, VideoMetadata};
pub use video_processor::{FrameSink, FrameSource, Frames, VideoReader, VideoWriterStream};
