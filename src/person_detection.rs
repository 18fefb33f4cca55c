// src/person_detection.rs

use crate::error::{PipelineError, Result};
use crate::inference::OnnxSession;
use crate::preprocessing::{self, Letterbox};
use crate::types::Config;
use opencv::{core::Mat, prelude::*};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PERSON_CLASS_ID: usize = 0;

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

pub fn class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2]
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: usize) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }

    /// Shift both corners by a tile origin.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        let [x1, y1, x2, y2] = self.bbox;
        Self {
            bbox: [x1 + dx, y1 + dy, x2 + dx, y2 + dy],
            ..self.clone()
        }
    }
}

/// Image region in, region-local detections out. Implementations apply their
/// confidence threshold before returning.
pub trait Detector {
    fn infer(&mut self, region: &Mat) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn infer(&mut self, region: &Mat) -> Result<Vec<Detection>> {
        (**self).infer(region)
    }
}

/// Supported pretrained weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelKind {
    #[serde(rename = "yolov8x")]
    Yolov8x,
    #[serde(rename = "rtdetr-x")]
    RtDetrX,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Yolov8x, ModelKind::RtDetrX];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Yolov8x => "yolov8x",
            ModelKind::RtDetrX => "rtdetr-x",
        }
    }

    pub fn weights_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.onnx", self.name()))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a model identifier to its weights file.
pub fn resolve_weights(model_name: &str, models_dir: &Path) -> Result<(ModelKind, PathBuf)> {
    let kind = ModelKind::from_name(model_name).ok_or_else(|| {
        let known: Vec<&str> = ModelKind::ALL.iter().map(|k| k.name()).collect();
        PipelineError::ModelNotFound(format!(
            "unknown model identifier {:?} (expected one of {})",
            model_name,
            known.join(", ")
        ))
    })?;

    let path = kind.weights_path(models_dir);
    if !path.is_file() {
        return Err(PipelineError::ModelNotFound(format!(
            "weights for {} not found at {}",
            kind,
            path.display()
        )));
    }
    Ok((kind, path))
}

/// Detector variant chosen at construction from the model identifier.
pub enum PersonDetector {
    Yolo(YoloDetector),
    RtDetr(RtDetrDetector),
}

impl PersonDetector {
    pub fn load(model_name: &str, config: &Config) -> Result<Self> {
        let (kind, path) = resolve_weights(model_name, Path::new(&config.model.models_dir))?;
        let session = OnnxSession::new(&path, &config.model)?;
        let settings = DecodeSettings {
            input_size: config.model.input_size,
            confidence_threshold: config.detection.confidence_threshold,
        };

        info!(
            "✓ {} detector initialized (conf >= {:.2})",
            kind, settings.confidence_threshold
        );

        Ok(match kind {
            ModelKind::Yolov8x => PersonDetector::Yolo(YoloDetector {
                session,
                settings,
                nms_iou_threshold: config.detection.nms_iou_threshold,
            }),
            ModelKind::RtDetrX => PersonDetector::RtDetr(RtDetrDetector { session, settings }),
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            PersonDetector::Yolo(_) => ModelKind::Yolov8x,
            PersonDetector::RtDetr(_) => ModelKind::RtDetrX,
        }
    }
}

impl Detector for PersonDetector {
    fn infer(&mut self, region: &Mat) -> Result<Vec<Detection>> {
        match self {
            PersonDetector::Yolo(d) => d.infer(region),
            PersonDetector::RtDetr(d) => d.infer(region),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeSettings {
    pub input_size: usize,
    pub confidence_threshold: f32,
}

pub struct YoloDetector {
    session: OnnxSession,
    settings: DecodeSettings,
    nms_iou_threshold: f32,
}

impl Detector for YoloDetector {
    fn infer(&mut self, region: &Mat) -> Result<Vec<Detection>> {
        let (input, lb) = preprocessing::letterbox(region, self.settings.input_size)?;
        let (shape, output) = self.session.run(input, self.settings.input_size)?;

        let region_size = (region.cols() as f32, region.rows() as f32);
        let detections = decode_yolo(&shape, &output, &lb, region_size, &self.settings)?;
        let detections = non_max_suppression(detections, self.nms_iou_threshold, false);

        debug!("YOLO: {} detections in region", detections.len());
        Ok(detections)
    }
}

pub struct RtDetrDetector {
    session: OnnxSession,
    settings: DecodeSettings,
}

impl Detector for RtDetrDetector {
    fn infer(&mut self, region: &Mat) -> Result<Vec<Detection>> {
        let input = preprocessing::stretch(region, self.settings.input_size)?;
        let (shape, output) = self.session.run(input, self.settings.input_size)?;

        let region_size = (region.cols() as f32, region.rows() as f32);
        let detections = decode_rtdetr(&shape, &output, region_size, &self.settings)?;

        debug!("RT-DETR: {} detections in region", detections.len());
        Ok(detections)
    }
}

/// YOLOv8 head: `[1, 4 + C, N]`, centre boxes in letterboxed input pixels.
pub fn decode_yolo(
    shape: &[i64],
    output: &[f32],
    lb: &Letterbox,
    region_size: (f32, f32),
    settings: &DecodeSettings,
) -> Result<Vec<Detection>> {
    let (channels, anchors) = match shape {
        [1, c, n] if *c > 4 => (*c as usize, *n as usize),
        _ => return Err(unexpected_shape("YOLO", shape)),
    };
    check_len("YOLO", output, channels * anchors)?;

    let num_classes = channels - 4;
    let mut detections = Vec::new();

    for i in 0..anchors {
        let (best_class, max_conf) = best_class((0..num_classes).map(|c| output[anchors * (4 + c) + i]));
        if max_conf < settings.confidence_threshold {
            continue;
        }

        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];

        let (x1, y1) = lb.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = lb.unmap(cx + w / 2.0, cy + h / 2.0);

        if let Some(bbox) = clamp_box([x1, y1, x2, y2], region_size) {
            detections.push(Detection::new(bbox, max_conf, best_class));
        }
    }

    Ok(detections)
}

/// RT-DETR head: `[1, N, 4 + C]`, centre boxes normalized to the input.
pub fn decode_rtdetr(
    shape: &[i64],
    output: &[f32],
    region_size: (f32, f32),
    settings: &DecodeSettings,
) -> Result<Vec<Detection>> {
    let (queries, channels) = match shape {
        [1, n, c] if *c > 4 => (*n as usize, *c as usize),
        _ => return Err(unexpected_shape("RT-DETR", shape)),
    };
    check_len("RT-DETR", output, channels * queries)?;

    let (region_w, region_h) = region_size;
    let mut detections = Vec::new();

    for row in output.chunks_exact(channels) {
        let (best_class, max_conf) = best_class(row[4..].iter().copied());
        if max_conf < settings.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = [
            (cx - w / 2.0) * region_w,
            (cy - h / 2.0) * region_h,
            (cx + w / 2.0) * region_w,
            (cy + h / 2.0) * region_h,
        ];

        if let Some(bbox) = clamp_box(bbox, region_size) {
            detections.push(Detection::new(bbox, max_conf, best_class));
        }
    }

    Ok(detections)
}

fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
    scores
        .enumerate()
        .fold((0, f32::MIN), |best, (c, conf)| if conf > best.1 { (c, conf) } else { best })
}

/// Clip to the region; boxes that collapse to nothing are dropped.
fn clamp_box(bbox: [f32; 4], (w, h): (f32, f32)) -> Option<[f32; 4]> {
    let clamped = [
        bbox[0].clamp(0.0, w),
        bbox[1].clamp(0.0, h),
        bbox[2].clamp(0.0, w),
        bbox[3].clamp(0.0, h),
    ];
    (clamped[2] > clamped[0] && clamped[3] > clamped[1]).then_some(clamped)
}

fn unexpected_shape(model: &str, shape: &[i64]) -> PipelineError {
    PipelineError::Inference(format!("unexpected {model} output shape {shape:?}"))
}

fn check_len(model: &str, output: &[f32], expected: usize) -> Result<()> {
    if output.len() < expected {
        return Err(PipelineError::Inference(format!(
            "{model} output has {} values, shape requires {expected}",
            output.len()
        )));
    }
    Ok(())
}

/// Greedy NMS. Candidates are visited by descending confidence; equal
/// confidences keep their input order, so callers control tie-breaks by how
/// they order the input.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    class_agnostic: bool,
) -> Vec<Detection> {
    if detections.len() < 2 {
        return detections;
    }

    // Stable sort: ties stay in input order.
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        let current = &detections[i];
        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            let other = &detections[j];
            if (class_agnostic || other.class_id == current.class_id)
                && calculate_iou(&current.bbox, &other.bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        keep.push(current.clone());
    }

    keep
}

pub fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], confidence: f32, class_id: usize) -> Detection {
        Detection::new(bbox, confidence, class_id)
    }

    const SETTINGS: DecodeSettings = DecodeSettings {
        input_size: 640,
        confidence_threshold: 0.3,
    };

    #[test]
    fn test_translated_adds_origin_to_both_corners() {
        let local = det([10.0, 20.0, 110.0, 220.0], 0.9, 0);
        let global = local.translated(512.0, 128.0);
        assert_eq!(global.bbox, [522.0, 148.0, 622.0, 348.0]);
        assert_eq!(global.confidence, 0.9);
        assert_eq!(global.class_id, 0);
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(calculate_iou(&a, &a), 1.0);
        assert_eq!(calculate_iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = calculate_iou(&a, &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(calculate_iou(&[0.0; 4], &[0.0; 4]), 0.0);
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let dets = vec![
            det([0.0, 0.0, 100.0, 100.0], 0.6, 0),
            det([2.0, 2.0, 100.0, 100.0], 0.8, 0),
            det([300.0, 300.0, 400.0, 400.0], 0.5, 0),
        ];
        let kept = non_max_suppression(dets, 0.5, false);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.8);
        assert_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn test_nms_is_class_aware_unless_agnostic() {
        let dets = vec![
            det([0.0, 0.0, 100.0, 100.0], 0.9, 0),
            det([0.0, 0.0, 100.0, 100.0], 0.7, 2),
        ];
        assert_eq!(non_max_suppression(dets.clone(), 0.5, false).len(), 2);
        let agnostic = non_max_suppression(dets, 0.5, true);
        assert_eq!(agnostic.len(), 1);
        assert_eq!(agnostic[0].class_id, 0);
    }

    #[test]
    fn test_nms_ties_resolved_by_input_order() {
        let first = det([0.0, 0.0, 100.0, 100.0], 0.7, 0);
        let second = det([1.0, 1.0, 101.0, 101.0], 0.7, 0);
        let kept = non_max_suppression(vec![first.clone(), second.clone()], 0.5, false);
        assert_eq!(kept, vec![first.clone()]);
        let kept = non_max_suppression(vec![second.clone(), first], 0.5, false);
        assert_eq!(kept, vec![second]);
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::from_name("yolov8x"), Some(ModelKind::Yolov8x));
        assert_eq!(ModelKind::from_name("rtdetr-x"), Some(ModelKind::RtDetrX));
        assert_eq!(ModelKind::from_name("yolov5s"), None);
        assert_eq!(
            ModelKind::RtDetrX.weights_path(Path::new("/models")),
            PathBuf::from("/models/rtdetr-x.onnx")
        );
    }

    #[test]
    fn test_resolve_weights_unknown_or_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_weights("invalid_model", dir.path()),
            Err(PipelineError::ModelNotFound(_))
        ));
        assert!(matches!(
            resolve_weights("yolov8x", dir.path()),
            Err(PipelineError::ModelNotFound(_))
        ));

        std::fs::write(dir.path().join("yolov8x.onnx"), b"weights").unwrap();
        let (kind, path) = resolve_weights("yolov8x", dir.path()).unwrap();
        assert_eq!(kind, ModelKind::Yolov8x);
        assert_eq!(path, dir.path().join("yolov8x.onnx"));
    }

    #[test]
    fn test_decode_yolo_unletterboxes_and_thresholds() {
        // 2 classes, 3 anchors, channel-major.
        let anchors = 3;
        let mut output = vec![0.0f32; 6 * anchors];
        let rows: [[f32; 6]; 3] = [
            [320.0, 320.0, 100.0, 200.0, 0.9, 0.1], // person, kept
            [100.0, 300.0, 20.0, 20.0, 0.1, 0.2],   // below threshold
            [600.0, 320.0, 100.0, 100.0, 0.1, 0.5], // class 1, clipped at right edge
        ];
        for (i, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                output[c * anchors + i] = *v;
            }
        }

        let lb = Letterbox::for_region(1280, 720, 640);
        let dets = decode_yolo(&[1, 6, 3], &output, &lb, (1280.0, 720.0), &SETTINGS).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].bbox, [540.0, 160.0, 740.0, 560.0]);
        assert_eq!(dets[1].class_id, 1);
        assert_eq!(dets[1].bbox[2], 1280.0);
    }

    #[test]
    fn test_decode_rtdetr_scales_normalized_boxes() {
        let output = vec![
            0.5, 0.5, 0.2, 0.4, 0.8, 0.05, // person
            0.1, 0.1, 0.1, 0.1, 0.2, 0.1, // below threshold
        ];
        let dets = decode_rtdetr(&[1, 2, 6], &output, (640.0, 208.0), &SETTINGS).unwrap();
        assert_eq!(dets.len(), 1);
        let [x1, y1, x2, y2] = dets[0].bbox;
        assert!((x1 - 256.0).abs() < 1e-3);
        assert!((y1 - 62.4).abs() < 1e-3);
        assert!((x2 - 384.0).abs() < 1e-3);
        assert!((y2 - 145.6).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        let lb = Letterbox::for_region(640, 640, 640);
        assert!(decode_yolo(&[1, 84], &[], &lb, (640.0, 640.0), &SETTINGS).is_err());
        assert!(decode_yolo(&[1, 84, 10], &[0.0; 10], &lb, (640.0, 640.0), &SETTINGS).is_err());
        assert!(decode_rtdetr(&[1, 300, 3], &[], (640.0, 640.0), &SETTINGS).is_err());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(class_name(PERSON_CLASS_ID), "person");
        assert_eq!(class_name(7), "truck");
        assert_eq!(class_name(500), "unknown");
    }
}
