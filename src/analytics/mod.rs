#[cfg(feature = "vision")]
mod object;
mod pipeline;

use chrono::Local;
use thiserror::Error;

use crate::camera::{Frame, FrameContent};
use crate::config::{Config, SourceKind};
use crate::types::{BoundingBox, DetectionEvent, LabelMap};

#[cfg(feature = "vision")]
pub use object::ObjectDetector;
pub use pipeline::{
    spawn_runner, RunControl, RunError, RunParts, RunSummary, StatusSnapshot, StopReason,
};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load detector: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("frame type not supported by this detector")]
    UnsupportedFrame,
}

/// Object detection capability consumed by the run loop.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectorError>;
}

/// Passes through detections that were recorded with the frame.
pub struct RecordedDetector {
    labels: LabelMap,
}

impl RecordedDetector {
    pub fn new(labels: LabelMap) -> Self {
        Self { labels }
    }
}

impl Detector for RecordedDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>, DetectorError> {
        let recorded = match &frame.content {
            FrameContent::Recorded(d) => d,
            #[allow(unreachable_patterns)]
            _ => return Err(DetectorError::UnsupportedFrame),
        };

        let now = Local::now();
        Ok(recorded
            .iter()
            .map(|d| {
                let [x0, y0, x1, y1] = d.bbox;
                DetectionEvent {
                    timestamp: now,
                    class_id: d.class_id,
                    class_label: self.labels.resolve(d.class_id),
                    confidence: d.confidence,
                    bbox: BoundingBox::from_corners(x0, y0, x1, y1),
                }
            })
            .collect())
    }
}

/// Builds the detector matching the configured source. Failure here aborts
/// the run before the loop starts.
pub fn open_detector(config: &Config) -> Result<Box<dyn Detector>, DetectorError> {
    let labels = LabelMap::new(config.detection.labels.clone());
    match config.source.kind {
        SourceKind::Replay => Ok(Box::new(RecordedDetector::new(labels))),
        #[cfg(feature = "vision")]
        SourceKind::Camera | SourceKind::File => {
            Ok(Box::new(ObjectDetector::new(&config.detector.model_path, labels)?))
        }
        #[cfg(not(feature = "vision"))]
        kind => Err(DetectorError::Load(format!(
            "source kind {kind:?} needs the 'vision' feature"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::RecordedDetection;

    #[test]
    fn test_recorded_detector_resolves_labels() {
        let mut detector = RecordedDetector::new(LabelMap::new(
            Config::default().detection.labels,
        ));
        let frame = Frame {
            index: 0,
            content: FrameContent::Recorded(vec![
                RecordedDetection {
                    class_id: 12,
                    confidence: 0.7,
                    bbox: [0.1, 0.1, 0.5, 0.6],
                },
                RecordedDetection {
                    class_id: 99,
                    confidence: 0.9,
                    bbox: [0.0; 4],
                },
            ]),
        };

        let events = detector.infer(&frame).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].class_label, "dog");
        assert_eq!(events[1].class_label, "class_99");
        assert!((events[0].bbox.width - 0.4).abs() < 1e-6);
    }
}
