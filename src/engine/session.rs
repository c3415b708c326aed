use std::collections::BTreeMap;

use crate::config::OpenSessionPolicy;
use crate::engine::filter::FrameClasses;
use crate::types::{Session, Timestamp};

#[derive(Debug, Default, PartialEq)]
pub struct SessionChanges {
    pub opened: Vec<String>,
    pub closed: Vec<Session>,
}

/// Tracks one open session per class and closes it on the first frame the
/// class is missing.
pub struct SessionTracker {
    open: BTreeMap<String, Timestamp>,
    on_stop: OpenSessionPolicy,
}

impl SessionTracker {
    pub fn new(on_stop: OpenSessionPolicy) -> Self {
        Self {
            open: BTreeMap::new(),
            on_stop,
        }
    }

    pub fn observe(&mut self, frame_classes: &FrameClasses, now: Timestamp) -> SessionChanges {
        let mut changes = SessionChanges::default();

        let gone: Vec<String> = self
            .open
            .keys()
            .filter(|class| !frame_classes.contains(*class))
            .cloned()
            .collect();
        for class in gone {
            if let Some(start) = self.open.remove(&class) {
                if let Some(session) = close_session(class, start, now) {
                    changes.closed.push(session);
                }
            }
        }

        for class in frame_classes {
            if !self.open.contains_key(class) {
                self.open.insert(class.clone(), now);
                tracing::debug!(class = %class, "session opened");
                changes.opened.push(class.clone());
            }
        }

        changes
    }

    /// Settles every open session at `stop_time` according to the stop policy.
    pub fn finish(&mut self, stop_time: Timestamp) -> Vec<Session> {
        let open = std::mem::take(&mut self.open);
        match self.on_stop {
            OpenSessionPolicy::Close => open
                .into_iter()
                .filter_map(|(class, start)| close_session(class, start, stop_time))
                .collect(),
            OpenSessionPolicy::Discard => {
                for class in open.keys() {
                    tracing::debug!(class = %class, "discarding session open at stop");
                }
                Vec::new()
            }
        }
    }

    pub fn reset(&mut self) {
        self.open.clear();
    }

    pub fn open_classes(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }

    pub fn is_open(&self, class: &str) -> bool {
        self.open.contains_key(class)
    }
}

fn close_session(class: String, start: Timestamp, end: Timestamp) -> Option<Session> {
    match Session::close(class.clone(), start, end) {
        Some(session) => {
            tracing::info!(
                class = %session.class,
                duration_secs = format!("{:.2}", session.duration_secs()),
                "session closed"
            );
            Some(session)
        }
        None => {
            tracing::debug!(class = %class, "discarding zero-length session");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeDelta, TimeZone};

    fn at(ms: i64) -> Timestamp {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn classes(names: &[&str]) -> FrameClasses {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_contiguous_presence_yields_one_session() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Close);
        let mut closed = Vec::new();
        for i in 0..10 {
            let changes = tracker.observe(&classes(&["dog"]), at(i * 100));
            assert_eq!(changes.opened.len(), usize::from(i == 0));
            closed.extend(changes.closed);
        }
        assert!(closed.is_empty());

        let changes = tracker.observe(&classes(&[]), at(1000));
        assert_eq!(changes.closed.len(), 1);
        let session = &changes.closed[0];
        assert_eq!(session.class, "dog");
        assert_eq!(session.start, at(0));
        assert_eq!(session.end, at(1000));
        assert!((session.duration_secs() - 1.0).abs() < 1e-9);
        assert!(!tracker.is_open("dog"));
    }

    #[test]
    fn test_classes_tracked_independently() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Close);
        tracker.observe(&classes(&["dog"]), at(0));
        tracker.observe(&classes(&["dog", "cat"]), at(100));
        let changes = tracker.observe(&classes(&["cat"]), at(200));
        assert_eq!(changes.closed.len(), 1);
        assert_eq!(changes.closed[0].class, "dog");
        assert_eq!(tracker.open_classes(), vec!["cat".to_string()]);

        let changes = tracker.observe(&classes(&["dog"]), at(300));
        assert_eq!(changes.opened, vec!["dog".to_string()]);
        assert_eq!(changes.closed.len(), 1);
        assert_eq!(changes.closed[0].class, "cat");
        assert_eq!(changes.closed[0].start, at(100));
    }

    #[test]
    fn test_flicker_splits_sessions() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Close);
        tracker.observe(&classes(&["sheep"]), at(0));
        let first = tracker.observe(&classes(&[]), at(100)).closed;
        tracker.observe(&classes(&["sheep"]), at(200));
        let second = tracker.observe(&classes(&[]), at(300)).closed;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].start, at(200));
    }

    #[test]
    fn test_finish_closes_open_sessions_at_stop_time() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Close);
        tracker.observe(&classes(&["cow", "horse"]), at(0));
        let sessions = tracker.finish(at(2500));
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.end == at(2500)));
        assert!(tracker.open_classes().is_empty());
    }

    #[test]
    fn test_finish_discard_policy() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Discard);
        tracker.observe(&classes(&["cow"]), at(0));
        assert!(tracker.finish(at(2500)).is_empty());
        assert!(tracker.open_classes().is_empty());
    }

    #[test]
    fn test_zero_length_session_discarded() {
        let mut tracker = SessionTracker::new(OpenSessionPolicy::Close);
        tracker.observe(&classes(&["bird"]), at(0));
        assert!(tracker.finish(at(0)).is_empty());

        tracker.observe(&classes(&["bird"]), at(50));
        assert!(tracker.observe(&classes(&[]), at(50)).closed.is_empty());
    }
}
