// src/pipeline/orchestrator.rs
//
// INIT -> VALIDATING -> STREAMING -> FINALIZING -> DONE, with FAILED
// reachable from every state before DONE. Input and output streams are
// closed in FINALIZING on every path; their Drop impls cover early returns
// that happen before FINALIZING is reached.

use crate::annotator::Annotator;
use crate::error::{PipelineError, Result};
use crate::person_detection::{Detector, PersonDetector};
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::sliced_inference::SlicedInferenceEngine;
use crate::tiling::TileGrid;
use crate::types::{Config, VideoMetadata};
use crate::video_processor::{FrameSink, FrameSource, Frames, VideoReader, VideoWriterStream};
use opencv::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    Validating,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output_path: PathBuf,
    pub model: String,
    pub metadata: VideoMetadata,
    pub metrics: MetricsSummary,
}

struct StateTracker {
    state: PipelineState,
    input: PathBuf,
}

impl StateTracker {
    fn new(input: &Path) -> Self {
        Self {
            state: PipelineState::Init,
            input: input.to_path_buf(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug!("{}: {:?} -> {:?}", self.input.display(), self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: &PipelineError) {
        error!(
            "{}: run failed in {:?} ({}): {}",
            self.input.display(),
            self.state,
            err.kind(),
            err
        );
        self.state = PipelineState::Failed;
    }
}

pub struct InferencePipeline {
    config: Config,
}

impl InferencePipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Annotate `input_path` with `model_name` and return the written video's path.
    pub fn run(&self, model_name: &str, input_path: &Path, output_dir: &Path) -> Result<PathBuf> {
        self.run_with_report(model_name, input_path, output_dir)
            .map(|report| report.output_path)
    }

    pub fn run_with_report(
        &self,
        model_name: &str,
        input_path: &Path,
        output_dir: &Path,
    ) -> Result<RunReport> {
        let output_path = output_path_for(input_path, model_name, output_dir);
        self.run_to(model_name, input_path, &output_path, &PipelineMetrics::new())
    }

    /// Like [`run_with_report`](Self::run_with_report) with an explicit output
    /// file. Counters go to `metrics`, so a clone held elsewhere can poll
    /// progress while the run streams.
    pub fn run_to(
        &self,
        model_name: &str,
        input_path: &Path,
        output_path: &Path,
        metrics: &PipelineMetrics,
    ) -> Result<RunReport> {
        let mut tracker = StateTracker::new(input_path);
        let result = self.execute(model_name, input_path, output_path, metrics, &mut tracker);

        match &result {
            Ok(report) => {
                tracker.enter(PipelineState::Done);
                info!(
                    "✓ {} -> {} ({} frames, {} persons drawn, {:.1} FPS)",
                    input_path.display(),
                    report.output_path.display(),
                    report.metrics.frames_written,
                    report.metrics.target_detections,
                    report.metrics.fps
                );
            }
            Err(e) => tracker.fail(e),
        }
        result
    }

    fn execute(
        &self,
        model_name: &str,
        input_path: &Path,
        output_path: &Path,
        metrics: &PipelineMetrics,
        tracker: &mut StateTracker,
    ) -> Result<RunReport> {
        let mut detector = PersonDetector::load(model_name, &self.config)?;

        tracker.enter(PipelineState::Validating);
        let mut reader = VideoReader::open(input_path)?;
        let metadata = reader.metadata();

        tracker.enter(PipelineState::Streaming);
        let mut writer =
            VideoWriterStream::create(output_path, &metadata, &self.config.video.fourcc)?;

        self.drive(&mut detector, &mut reader, &mut writer, metrics, tracker)?;

        Ok(RunReport {
            output_path: output_path.to_path_buf(),
            model: model_name.to_string(),
            metadata,
            metrics: metrics.summary(),
        })
    }

    /// STREAMING then FINALIZING over any source/sink pair. Both streams are
    /// closed before this returns, whether streaming succeeded or not.
    fn drive<D, S, W>(
        &self,
        detector: &mut D,
        source: &mut S,
        sink: &mut W,
        metrics: &PipelineMetrics,
        tracker: &mut StateTracker,
    ) -> Result<u64>
    where
        D: Detector + ?Sized,
        S: FrameSource + ?Sized,
        W: FrameSink + ?Sized,
    {
        let streamed = self.stream(detector, source, sink, metrics);

        tracker.enter(PipelineState::Finalizing);
        source.close();
        sink.close();

        streamed
    }

    fn stream<D, S, W>(
        &self,
        detector: &mut D,
        source: &mut S,
        sink: &mut W,
        metrics: &PipelineMetrics,
    ) -> Result<u64>
    where
        D: Detector + ?Sized,
        S: FrameSource + ?Sized,
        W: FrameSink + ?Sized,
    {
        let metadata = source.metadata();
        let grid = TileGrid::from_config(metadata.width, metadata.height, &self.config.slicing);
        info!(
            "Tile grid: {} x {} ({} tiles of up to {}x{})",
            grid.columns(),
            grid.rows(),
            grid.len(),
            self.config.slicing.slice_width,
            self.config.slicing.slice_height
        );

        let engine = SlicedInferenceEngine::new(&self.config.slicing);
        let annotator = Annotator::new(
            &self.config.annotation,
            self.config.detection.target_class_id,
        );
        let progress_interval = self.config.video.progress_interval.max(1);

        let mut written = 0u64;
        for frame in Frames::new(source) {
            let mut frame = frame?;
            metrics.inc(&metrics.frames_read);

            let size = (frame.cols() as u32, frame.rows() as u32);
            if size != (metadata.width, metadata.height) {
                return Err(PipelineError::DecodeFrame {
                    frame_index: written,
                    reason: format!(
                        "decoded {}x{} frame, stream declares {}x{}",
                        size.0, size.1, metadata.width, metadata.height
                    ),
                });
            }

            let (detections, stats) = engine.process_frame_with_stats(&frame, &grid, detector)?;
            let drawn = annotator.annotate(&mut frame, &detections)?;
            metrics.record_frame(&stats, drawn);

            sink.write_frame(&frame)?;
            metrics.inc(&metrics.frames_written);
            written += 1;

            if written % progress_interval == 0 {
                info!(
                    "Progress: {:.1}% ({}/{} frames)",
                    written as f64 / metadata.total_frames as f64 * 100.0,
                    written,
                    metadata.total_frames
                );
            }
        }

        if written < metadata.total_frames {
            info!(
                "Stream ended after {} of {} declared frames",
                written, metadata.total_frames
            );
        }
        Ok(written)
    }
}

pub fn output_path_for(input_path: &Path, model_name: &str, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}_{}_annotated.mp4", stem_of(input_path), model_name))
}

/// One output per input for a directory run. Each output lands under
/// `output_dir` at the input's position relative to `batch_root`; inputs
/// sharing a directory and a stem also carry their extension in the name.
pub fn batch_output_paths(
    batch_root: &Path,
    inputs: &[PathBuf],
    model_name: &str,
    output_dir: &Path,
) -> Vec<PathBuf> {
    let target_dir = |input: &Path| {
        let relative = input
            .parent()
            .and_then(|parent| parent.strip_prefix(batch_root).ok())
            .unwrap_or_else(|| Path::new(""));
        output_dir.join(relative)
    };

    let mut by_name: HashMap<(PathBuf, String), usize> = HashMap::new();
    for input in inputs {
        *by_name
            .entry((target_dir(input), stem_of(input)))
            .or_default() += 1;
    }

    inputs
        .iter()
        .map(|input| {
            let dir = target_dir(input);
            let stem = stem_of(input);
            if by_name[&(dir.clone(), stem.clone())] < 2 {
                return output_path_for(input, model_name, &dir);
            }
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            dir.join(format!("{}_{}_{}_annotated.mp4", stem, ext, model_name))
        })
        .collect()
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}
