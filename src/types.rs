use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Wall-clock instant used for every engine decision.
pub type Timestamp = DateTime<Local>;

/// Box in frame-relative coordinates, each component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let x0 = x0.clamp(0.0, 1.0);
        let y0 = y0.clamp(0.0, 1.0);
        let x1 = x1.clamp(0.0, 1.0);
        let y1 = y1.clamp(0.0, 1.0);
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }
}

/// One classified object returned by a detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub timestamp: Timestamp,
    pub class_id: usize,
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A contiguous interval during which one class was continuously present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub class: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Session {
    /// Returns `None` for intervals that are empty or run backwards.
    pub fn close(class: String, start: Timestamp, end: Timestamp) -> Option<Self> {
        if end <= start {
            return None;
        }
        Some(Self { class, start, end })
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
    }
}

/// Resolves detector class indices to names.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn resolve(&self, class_id: usize) -> String {
        match self.labels.get(class_id) {
            Some(label) => label.clone(),
            None => format!("class_{}", class_id),
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn at(secs: i64) -> Timestamp {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_session_rejects_empty_interval() {
        assert!(Session::close("dog".into(), at(3), at(3)).is_none());
        assert!(Session::close("dog".into(), at(4), at(3)).is_none());
        let s = Session::close("dog".into(), at(0), at(3)).unwrap();
        assert!((s.duration_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_map_out_of_range() {
        let labels = LabelMap::new(vec!["background".into(), "bird".into()]);
        assert_eq!(labels.resolve(1), "bird");
        assert_eq!(labels.resolve(42), "class_42");
        assert!(!labels.contains("class_42"));
    }

    #[test]
    fn test_bbox_from_corners_normalizes() {
        let b = BoundingBox::from_corners(0.8, 0.6, 0.2, 1.4);
        assert!((b.x - 0.2).abs() < 1e-6);
        assert!((b.y - 0.6).abs() < 1e-6);
        assert!((b.width - 0.6).abs() < 1e-6);
        assert!((b.height - 0.4).abs() < 1e-6);
    }
}
