use ndarray::{Array4, ArrayViewD};
use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use chrono::Local;

use super::{Detector, DetectorError};
use crate::camera::{Frame, FrameContent};
use crate::types::{BoundingBox, DetectionEvent, LabelMap};

const INPUT_SIZE: u32 = 640;
// Candidates below this never reach the frame filter.
const SCORE_FLOOR: f32 = 0.05;

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: f32,
    height: f32,
}

/// ONNX Runtime detector for end-to-end models with `logits` and
/// `pred_boxes` outputs.
pub struct ObjectDetector {
    session: Session,
    labels: LabelMap,
}

impl ObjectDetector {
    pub fn new(model_path: &str, labels: LabelMap) -> Result<Self, DetectorError> {
        let builder = Session::builder()
            .map_err(|e| load_failed(model_path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_failed(model_path, e))?
            .with_intra_threads(4)
            .map_err(|e| load_failed(model_path, e))?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path).map_err(|e| load_failed(model_path, e))?
        } else {
            if !std::path::Path::new(model_path).exists() {
                return Err(DetectorError::Load(format!("model not found: {model_path}")));
            }
            builder.commit_from_file(model_path).map_err(|e| load_failed(model_path, e))?
        };

        tracing::info!(model = %model_path, "detector loaded");
        Ok(Self { session, labels })
    }

    fn detect(&mut self, image: &Mat) -> Result<Vec<DetectionEvent>, DetectorError> {
        if image.rows() == 0 || image.cols() == 0 {
            return Ok(Vec::new());
        }

        let (tensor, letterbox) = preprocess(image)?;
        let input = TensorRef::from_array_view(tensor.view())
            .map_err(inference_failed)?
            .into_dyn();
        let outputs = self.session.run(ort::inputs![input]).map_err(inference_failed)?;

        let (Some(logits), Some(boxes)) = (outputs.get("logits"), outputs.get("pred_boxes"))
        else {
            return Err(DetectorError::Inference(
                "expected 'logits' and 'pred_boxes' outputs".to_string(),
            ));
        };
        let logits = logits.try_extract_array::<f32>().map_err(inference_failed)?.to_owned();
        let boxes = boxes.try_extract_array::<f32>().map_err(inference_failed)?.to_owned();
        drop(outputs);

        self.postprocess(&logits.view(), &boxes.view(), &letterbox)
    }

    fn postprocess(
        &self,
        logits: &ArrayViewD<f32>,
        boxes: &ArrayViewD<f32>,
        letterbox: &Letterbox,
    ) -> Result<Vec<DetectionEvent>, DetectorError> {
        let shape = logits.shape();
        if shape.len() < 2 || boxes.shape().len() < 2 {
            return Ok(Vec::new());
        }
        let (candidates, num_classes) = if shape.len() == 3 {
            (shape[1], shape[2])
        } else {
            (shape[0], shape[1])
        };

        let logits = logits
            .as_slice()
            .ok_or_else(|| DetectorError::Inference("non-contiguous logits".to_string()))?;
        let boxes = boxes
            .as_slice()
            .ok_or_else(|| DetectorError::Inference("non-contiguous boxes".to_string()))?;
        check_output_lengths(logits.len(), boxes.len(), candidates, num_classes)?;

        let input = INPUT_SIZE as f32;
        let now = Local::now();
        let mut events = Vec::new();

        for i in 0..candidates {
            let (class_id, score) = (0..num_classes)
                .map(|j| (j, sigmoid(logits[i * num_classes + j])))
                .fold((0, 0.0f32), |best, c| if c.1 > best.1 { c } else { best });

            if score < SCORE_FLOOR {
                continue;
            }

            // (cx, cy, w, h) relative to the letterboxed input
            let cx = boxes[i * 4] * input;
            let cy = boxes[i * 4 + 1] * input;
            let w = boxes[i * 4 + 2] * input;
            let h = boxes[i * 4 + 3] * input;

            let x0 = ((cx - w / 2.0) - letterbox.pad_x) / letterbox.scale / letterbox.width;
            let y0 = ((cy - h / 2.0) - letterbox.pad_y) / letterbox.scale / letterbox.height;
            let x1 = ((cx + w / 2.0) - letterbox.pad_x) / letterbox.scale / letterbox.width;
            let y1 = ((cy + h / 2.0) - letterbox.pad_y) / letterbox.scale / letterbox.height;

            events.push(DetectionEvent {
                timestamp: now,
                class_id,
                class_label: self.labels.resolve(class_id),
                confidence: score,
                bbox: BoundingBox::from_corners(x0, y0, x1, y1),
            });
        }

        Ok(events)
    }
}

impl Detector for ObjectDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectorError> {
        match &frame.content {
            FrameContent::Image(image) => self.detect(image),
            FrameContent::Recorded(_) => Err(DetectorError::UnsupportedFrame),
        }
    }
}

fn check_output_lengths(
    logits: usize,
    boxes: usize,
    candidates: usize,
    num_classes: usize,
) -> Result<(), DetectorError> {
    let expected_logits = candidates.checked_mul(num_classes);
    let expected_boxes = candidates.checked_mul(4);
    if num_classes == 0
        || expected_logits.is_none_or(|n| logits < n)
        || expected_boxes.is_none_or(|n| boxes < n)
    {
        return Err(DetectorError::Inference(format!(
            "unexpected output sizes: {logits} logits and {boxes} box values for \
             {candidates} candidates of {num_classes} classes"
        )));
    }
    Ok(())
}

fn load_failed<E: std::fmt::Display>(model_path: &str, e: E) -> DetectorError {
    DetectorError::Load(format!("{model_path}: {e}"))
}

fn inference_failed<E: std::fmt::Display>(e: E) -> DetectorError {
    DetectorError::Inference(e.to_string())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn preprocess(image: &Mat) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let height = image.rows() as f32;
    let width = image.cols() as f32;
    let input = INPUT_SIZE as i32;

    let scale = (input as f32 / width).min(input as f32 / height);
    let new_w = (width * scale).round() as i32;
    let new_h = (height * scale).round() as i32;

    let mut resized = Mat::default();
    imgproc::resize(
        image,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(inference_failed)?;

    let pad_x = (input - new_w) / 2;
    let pad_y = (input - new_h) / 2;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        input - new_h - pad_y,
        pad_x,
        input - new_w - pad_x,
        BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0),
    )
    .map_err(inference_failed)?;

    let mut rgb = Mat::default();
    imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(inference_failed)?;

    let data = rgb.data_bytes().map_err(inference_failed)?;
    let side = INPUT_SIZE as usize;
    if data.len() < side * side * 3 {
        return Err(DetectorError::Inference("frame data too small".to_string()));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let idx = (y * side + x) * 3;
            tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
            tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
        }
    }

    Ok((
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            width,
            height,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_lengths_checked_before_indexing() {
        assert!(check_output_lengths(300 * 80, 300 * 4, 300, 80).is_ok());
        assert!(matches!(
            check_output_lengths(300 * 80, 299 * 4, 300, 80),
            Err(DetectorError::Inference(_))
        ));
        assert!(matches!(
            check_output_lengths(10, 300 * 4, 300, 80),
            Err(DetectorError::Inference(_))
        ));
        assert!(check_output_lengths(0, 0, 300, 0).is_err());
    }
}
