use std::collections::BTreeSet;

use crate::types::DetectionEvent;

/// Classes present in one frame after thresholding and allow-listing.
pub type FrameClasses = BTreeSet<String>;

/// Reduces a frame's raw detections to the set of tracked classes present.
#[derive(Debug, Clone)]
pub struct FrameFilter {
    confidence_threshold: f32,
    tracked_classes: Vec<String>,
}

impl FrameFilter {
    pub fn new(confidence_threshold: f32, tracked_classes: Vec<String>) -> Self {
        Self {
            confidence_threshold,
            tracked_classes,
        }
    }

    pub fn apply(&self, detections: &[DetectionEvent]) -> FrameClasses {
        detections
            .iter()
            .filter(|d| d.confidence > self.confidence_threshold)
            .filter(|d| self.tracked_classes.contains(&d.class_label))
            .map(|d| d.class_label.clone())
            .collect()
    }

    pub fn tracked_classes(&self) -> &[String] {
        &self.tracked_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use chrono::Local;

    fn event(label: &str, confidence: f32) -> DetectionEvent {
        DetectionEvent {
            timestamp: Local::now(),
            class_id: 0,
            class_label: label.to_string(),
            confidence,
            bbox: BoundingBox::default(),
        }
    }

    fn filter() -> FrameFilter {
        FrameFilter::new(0.2, vec!["dog".into(), "cat".into()])
    }

    #[test]
    fn test_collapses_duplicates() {
        let classes = filter().apply(&[event("dog", 0.5), event("dog", 0.9), event("cat", 0.3)]);
        assert_eq!(classes.len(), 2);
        assert!(classes.contains("dog"));
        assert!(classes.contains("cat"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let classes = filter().apply(&[event("dog", 0.2), event("cat", 0.21)]);
        assert_eq!(classes.into_iter().collect::<Vec<_>>(), vec!["cat".to_string()]);
    }

    #[test]
    fn test_drops_untracked_classes() {
        assert!(filter().apply(&[event("person", 0.99), event("car", 0.8)]).is_empty());
    }

    #[test]
    fn test_empty_frame() {
        assert!(filter().apply(&[]).is_empty());
    }
}
