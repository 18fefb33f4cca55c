// src/annotator.rs

use crate::error::{PipelineError, Result};
use crate::person_detection::{class_name, Detection};
use crate::types::AnnotationConfig;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

/// Draws boxes and confidence labels for one target class directly into
/// BGR frames.
pub struct Annotator {
    target_class_id: usize,
    color: core::Scalar,
    thickness: i32,
    font_scale: f64,
    label_offset: i32,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig, target_class_id: usize) -> Self {
        let [b, g, r] = config.color;
        Self {
            target_class_id,
            color: core::Scalar::new(b as f64, g as f64, r as f64, 0.0),
            thickness: config.thickness.max(1),
            font_scale: config.font_scale,
            label_offset: config.label_offset,
        }
    }

    /// Mutates `frame` in place. Detections of other classes are skipped.
    /// Returns how many detections were drawn.
    pub fn annotate(&self, frame: &mut Mat, detections: &[Detection]) -> Result<usize> {
        let (frame_w, frame_h) = (frame.cols(), frame.rows());
        if frame_w <= 0 || frame_h <= 0 {
            return Ok(0);
        }
        let mut drawn = 0;

        for det in detections
            .iter()
            .filter(|d| d.class_id == self.target_class_id)
        {
            let Some(rect) = box_rect(&det.bbox, frame_w, frame_h) else {
                continue;
            };

            imgproc::rectangle(frame, rect, self.color, self.thickness, imgproc::LINE_8, 0)
                .map_err(draw_error)?;

            let label = self.label(det);
            let mut baseline = 0;
            let text_size =
                imgproc::get_text_size(&label, FONT, self.font_scale, self.thickness, &mut baseline)
                    .map_err(draw_error)?;
            let origin = label_origin(
                text_size,
                baseline,
                rect,
                self.label_offset,
                frame_w,
                frame_h,
            );

            imgproc::put_text(
                frame,
                &label,
                origin,
                FONT,
                self.font_scale,
                self.color,
                self.thickness,
                imgproc::LINE_8,
                false,
            )
            .map_err(draw_error)?;

            drawn += 1;
        }

        Ok(drawn)
    }

    /// "Person: 0.87"
    pub fn label(&self, det: &Detection) -> String {
        let name = class_name(det.class_id);
        let mut chars = name.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("{}: {:.2}", capitalized, det.confidence)
    }
}

/// Integer rectangle clipped to the frame; `None` if nothing is left.
fn box_rect(bbox: &[f32; 4], frame_w: i32, frame_h: i32) -> Option<core::Rect> {
    let x1 = (bbox[0] as i32).clamp(0, frame_w - 1);
    let y1 = (bbox[1] as i32).clamp(0, frame_h - 1);
    let x2 = (bbox[2] as i32).clamp(0, frame_w - 1);
    let y2 = (bbox[3] as i32).clamp(0, frame_h - 1);
    (x2 > x1 && y2 > y1).then(|| core::Rect::new(x1, y1, x2 - x1, y2 - y1))
}

/// Baseline-left text origin just above the box, kept inside the frame.
fn label_origin(
    text: core::Size,
    baseline: i32,
    rect: core::Rect,
    offset: i32,
    frame_w: i32,
    frame_h: i32,
) -> core::Point {
    let max_x = (frame_w - text.width).max(0);
    let x = rect.x.clamp(0, max_x);

    let min_y = text.height;
    let max_y = (frame_h - 1 - baseline).max(min_y);
    let y = (rect.y - offset).clamp(min_y, max_y);

    core::Point::new(x, y)
}

fn draw_error(err: opencv::Error) -> PipelineError {
    PipelineError::Inference(format!("annotation failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, core::Scalar::all(0.0))
            .unwrap()
    }

    fn annotator() -> Annotator {
        Annotator::new(&AnnotationConfig::default(), 0)
    }

    fn pixels(frame: &Mat) -> Vec<u8> {
        frame.data_bytes().unwrap().to_vec()
    }

    #[test]
    fn test_non_target_classes_leave_frame_untouched() {
        let mut frame = blank(320, 240);
        let before = pixels(&frame);

        let dets = vec![
            Detection::new([10.0, 50.0, 100.0, 200.0], 0.9, 2),
            Detection::new([150.0, 60.0, 250.0, 220.0], 0.8, 7),
        ];
        let drawn = annotator().annotate(&mut frame, &dets).unwrap();

        assert_eq!(drawn, 0);
        assert_eq!(pixels(&frame), before);
    }

    #[test]
    fn test_mixed_classes_draw_only_target() {
        let only_person = vec![Detection::new([40.0, 60.0, 120.0, 200.0], 0.87, 0)];
        let mut mixed = only_person.clone();
        mixed.push(Detection::new([180.0, 30.0, 300.0, 230.0], 0.95, 2));

        let mut expected = blank(320, 240);
        annotator().annotate(&mut expected, &only_person).unwrap();

        let mut frame = blank(320, 240);
        let drawn = annotator().annotate(&mut frame, &mixed).unwrap();

        assert_eq!(drawn, 1);
        assert_eq!(pixels(&frame), pixels(&expected));
        assert_ne!(pixels(&frame), pixels(&blank(320, 240)));

        // Box edge carries the configured green.
        let px = frame.at_2d::<core::Vec3b>(120, 40).unwrap();
        assert_eq!((px[0], px[1], px[2]), (0, 255, 0));
    }

    #[test]
    fn test_empty_frame_draws_nothing() {
        let mut frame = Mat::default();
        let dets = vec![Detection::new([10.0, 10.0, 50.0, 80.0], 0.9, 0)];
        assert_eq!(annotator().annotate(&mut frame, &dets).unwrap(), 0);
        assert!(frame.empty());
    }

    #[test]
    fn test_label_text() {
        let det = Detection::new([0.0, 0.0, 1.0, 1.0], 0.8765, 0);
        assert_eq!(annotator().label(&det), "Person: 0.88");
        let det = Detection::new([0.0, 0.0, 1.0, 1.0], 0.5, 0);
        assert_eq!(annotator().label(&det), "Person: 0.50");
    }

    #[test]
    fn test_label_origin_sits_above_box() {
        let text = core::Size::new(100, 12);
        let rect = core::Rect::new(200, 100, 50, 80);
        let origin = label_origin(text, 5, rect, 10, 640, 480);
        assert_eq!((origin.x, origin.y), (200, 90));
    }

    #[test]
    fn test_label_origin_clamped_at_frame_edges() {
        let text = core::Size::new(100, 12);

        let top_left = label_origin(text, 5, core::Rect::new(0, 0, 50, 50), 10, 640, 480);
        assert_eq!((top_left.x, top_left.y), (0, 12));

        let right = label_origin(text, 5, core::Rect::new(600, 200, 30, 30), 10, 640, 480);
        assert_eq!(right.x, 540);

        let narrow = label_origin(text, 5, core::Rect::new(10, 10, 20, 20), 10, 60, 480);
        assert_eq!(narrow.x, 0);
    }

    #[test]
    fn test_boxes_outside_frame_are_clipped_or_skipped() {
        assert_eq!(
            box_rect(&[-20.0, -5.0, 50.0, 60.0], 320, 240),
            Some(core::Rect::new(0, 0, 50, 60))
        );
        assert_eq!(box_rect(&[400.0, 10.0, 500.0, 60.0], 320, 240), None);

        let mut frame = blank(320, 240);
        let dets = vec![Detection::new([300.0, 0.0, 400.0, 30.0], 0.6, 0)];
        assert_eq!(annotator().annotate(&mut frame, &dets).unwrap(), 1);
    }
}
