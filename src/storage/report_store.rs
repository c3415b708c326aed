use std::sync::{Arc, PoisonError, RwLock};

use crate::types::Session;

/// Insertion-ordered log of completed sessions for the current run.
///
/// Cloning shares the underlying log. Only the detection worker appends;
/// every other holder reads copies.
pub struct ReportStore {
    sessions: Arc<RwLock<Vec<Session>>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
    }

    pub(crate) fn clear(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sessions whose class is in `classes`, in insertion order. An empty
    /// filter matches nothing.
    pub fn filter_by_class(&self, classes: &[String]) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| classes.contains(&s.class))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ReportStore {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeDelta, TimeZone};

    fn session(class: &str, start: i64, end: i64) -> Session {
        let base = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Session::close(
            class.to_string(),
            base + TimeDelta::seconds(start),
            base + TimeDelta::seconds(end),
        )
        .unwrap()
    }

    #[test]
    fn test_filter_keeps_insertion_order() {
        let store = ReportStore::new();
        store.push(session("dog", 0, 2));
        store.push(session("cat", 1, 3));
        store.push(session("dog", 4, 6));

        let dogs = store.filter_by_class(&["dog".to_string()]);
        assert_eq!(dogs.len(), 2);
        assert!(dogs[0].start < dogs[1].start);
        assert!(store.filter_by_class(&[]).is_empty());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_clones_share_log() {
        let store = ReportStore::new();
        let reader = store.clone();
        store.push(session("horse", 0, 1));
        assert_eq!(reader.sessions().len(), 1);
        store.clear();
        assert!(reader.is_empty());
    }
}
