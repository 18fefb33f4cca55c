// src/pipeline/mod.rs

pub mod metrics;
pub mod orchestrator;

pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::{
    batch_output_paths, output_path_for, InferencePipeline, PipelineState, RunReport,
};
