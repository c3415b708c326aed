//! Temporal decision layer: turns per-frame detections into session records
//! and a debounced intrusion alert.

mod alarm;
mod filter;
mod fps;
mod session;

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

pub use alarm::{AlarmEvent, SlidingWindowAlarm};
pub use filter::{FrameClasses, FrameFilter};
pub use fps::FpsMeter;
pub use session::{SessionChanges, SessionTracker};

use crate::config::Config;
use crate::storage::ReportStore;
use crate::types::{DetectionEvent, Session, Timestamp};

/// Outcome of feeding one frame to the engine.
#[derive(Debug, Default)]
pub struct DecisionResult {
    pub classes: FrameClasses,
    pub opened: Vec<String>,
    pub closed: Vec<Session>,
    pub alarm: Option<AlarmEvent>,
}

impl DecisionResult {
    pub fn triggered(&self) -> bool {
        matches!(self.alarm, Some(AlarmEvent::Triggered { .. }))
    }
}

/// Point-in-time view of the engine for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub frames: u64,
    pub window_len: usize,
    pub window_positives: usize,
    pub alert_active: bool,
    pub last_alert: Option<Timestamp>,
    pub open_classes: Vec<String>,
    pub frame_counts: BTreeMap<String, u64>,
    pub completed_sessions: usize,
}

/// Owns all mutable decision state for one detection run.
pub struct Engine {
    filter: FrameFilter,
    tracker: SessionTracker,
    alarm: SlidingWindowAlarm,
    report: ReportStore,
    frame_counts: BTreeMap<String, u64>,
    frames: u64,
}

impl Engine {
    pub fn new(config: &Config, report: ReportStore) -> Self {
        let filter = FrameFilter::new(
            config.detection.confidence_threshold,
            config.detection.tracked_classes.clone(),
        );
        let mut engine = Self {
            filter,
            tracker: SessionTracker::new(config.sessions.on_stop),
            alarm: SlidingWindowAlarm::new(&config.alarm),
            report,
            frame_counts: BTreeMap::new(),
            frames: 0,
        };
        engine.reset_counters();
        engine
    }

    /// `now` is the frame's wall-clock time for records; `tick` is the
    /// monotonic time the alarm cooldown is measured on.
    pub fn observe(
        &mut self,
        detections: &[DetectionEvent],
        now: Timestamp,
        tick: Instant,
    ) -> DecisionResult {
        self.frames += 1;

        let classes = self.filter.apply(detections);
        for class in &classes {
            *self.frame_counts.entry(class.clone()).or_insert(0) += 1;
        }

        let changes = self.tracker.observe(&classes, now);
        for session in &changes.closed {
            self.report.push(session.clone());
        }

        let alarm = self.alarm.observe(!classes.is_empty(), now, tick);
        if let Some(AlarmEvent::Triggered { positive_frames, .. }) = &alarm {
            tracing::warn!(
                positives = positive_frames,
                window = self.alarm.len(),
                "intrusion detected"
            );
        }

        DecisionResult {
            classes,
            opened: changes.opened,
            closed: changes.closed,
            alarm,
        }
    }

    /// Settles open sessions at `stop_time` and clears the active alert.
    pub fn finish(&mut self, stop_time: Timestamp) -> Vec<Session> {
        let closed = self.tracker.finish(stop_time);
        for session in &closed {
            self.report.push(session.clone());
        }
        self.alarm.clear_active();
        closed
    }

    /// Returns to the state of a fresh run; the report is emptied too.
    /// Called by the run's worker, the report's only writer.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.alarm.reset();
        self.report.clear();
        self.reset_counters();
    }

    fn reset_counters(&mut self) {
        self.frames = 0;
        self.frame_counts = self
            .filter
            .tracked_classes()
            .iter()
            .map(|c| (c.clone(), 0))
            .collect();
    }

    pub fn report(&self) -> &ReportStore {
        &self.report
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            frames: self.frames,
            window_len: self.alarm.len(),
            window_positives: self.alarm.positive_count(),
            alert_active: self.alarm.is_active(),
            last_alert: self.alarm.last_fired(),
            open_classes: self.tracker.open_classes(),
            frame_counts: self.frame_counts.clone(),
            completed_sessions: self.report.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OpenSessionPolicy, RearmPolicy};
    use crate::types::BoundingBox;
    use chrono::{Local, TimeDelta, TimeZone};
    use std::sync::OnceLock;
    use std::time::Duration;

    const FRAME_MS: i64 = 150;

    fn frame_time(i: i64) -> Timestamp {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::milliseconds(i * FRAME_MS)
    }

    fn tick(i: i64) -> Instant {
        static BASE: OnceLock<Instant> = OnceLock::new();
        *BASE.get_or_init(Instant::now) + Duration::from_millis((i * FRAME_MS) as u64)
    }

    fn dog(i: i64, confidence: f32) -> DetectionEvent {
        DetectionEvent {
            timestamp: frame_time(i),
            class_id: 12,
            class_label: "dog".to_string(),
            confidence,
            bbox: BoundingBox::from_corners(0.1, 0.1, 0.4, 0.5),
        }
    }

    fn engine(rearm: RearmPolicy, on_stop: OpenSessionPolicy) -> Engine {
        let mut config = Config::default();
        config.alarm.rearm = rearm;
        config.sessions.on_stop = on_stop;
        Engine::new(&config, ReportStore::new())
    }

    #[test]
    fn test_dog_scenario_one_session_one_alert() {
        let mut engine = engine(RearmPolicy::OnReset, OpenSessionPolicy::Close);
        let mut trigger_frames = Vec::new();
        let mut closed = Vec::new();

        for i in 1..=20 {
            let result = engine.observe(&[dog(i, 0.5)], frame_time(i), tick(i));
            assert_eq!(result.opened.len(), usize::from(i == 1));
            if result.triggered() {
                trigger_frames.push(i);
            }
            closed.extend(result.closed);
        }
        let result = engine.observe(&[], frame_time(21), tick(21));
        closed.extend(result.closed);

        assert_eq!(trigger_frames, vec![16]);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].class, "dog");
        let expected = (frame_time(21) - frame_time(1)).num_milliseconds() as f64 / 1000.0;
        assert!((closed[0].duration_secs() - expected).abs() < 1e-6);

        assert_eq!(engine.report().sessions(), closed);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.frames, 21);
        assert_eq!(snapshot.frame_counts["dog"], 20);
        assert_eq!(snapshot.frame_counts["cat"], 0);
        assert!(snapshot.alert_active);
        assert_eq!(snapshot.completed_sessions, 1);
    }

    #[test]
    fn test_low_confidence_frames_are_negative() {
        let mut engine = engine(RearmPolicy::OnReset, OpenSessionPolicy::Close);
        for i in 1..=40 {
            let result = engine.observe(&[dog(i, 0.15)], frame_time(i), tick(i));
            assert!(result.classes.is_empty());
            assert!(result.alarm.is_none());
        }
        assert!(engine.report().is_empty());
        assert_eq!(engine.snapshot().window_positives, 0);
    }

    #[test]
    fn test_finish_closes_and_clears_alert() {
        let mut engine = engine(RearmPolicy::OnReset, OpenSessionPolicy::Close);
        for i in 1..=20 {
            engine.observe(&[dog(i, 0.9)], frame_time(i), tick(i));
        }
        let closed = engine.finish(frame_time(30));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].end, frame_time(30));
        assert_eq!(engine.report().len(), 1);
        assert!(!engine.snapshot().alert_active);
    }

    #[test]
    fn test_finish_discard_keeps_report_clean() {
        let mut engine = engine(RearmPolicy::OnReset, OpenSessionPolicy::Discard);
        engine.observe(&[dog(1, 0.9)], frame_time(1), tick(1));
        assert!(engine.finish(frame_time(5)).is_empty());
        assert!(engine.report().is_empty());
    }

    #[test]
    fn test_reset_starts_fresh_run() {
        let report = ReportStore::new();
        let mut engine = Engine::new(&Config::default(), report.clone());
        engine.observe(&[dog(1, 0.9)], frame_time(1), tick(1));
        engine.observe(&[], frame_time(2), tick(2));
        assert_eq!(report.len(), 1);

        engine.reset();
        assert!(report.is_empty());
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.frames, 0);
        assert_eq!(snapshot.window_len, 0);
        assert!(snapshot.open_classes.is_empty());
        assert!(snapshot.frame_counts.values().all(|&n| n == 0));
    }

    #[test]
    fn test_new_engine_leaves_existing_report_alone() {
        let report = ReportStore::new();
        let mut first = Engine::new(&Config::default(), report.clone());
        first.observe(&[dog(1, 0.9)], frame_time(1), tick(1));
        first.finish(frame_time(3));
        assert_eq!(report.len(), 1);

        let _second = Engine::new(&Config::default(), report.clone());
        assert_eq!(report.len(), 1);
    }
}
