use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{AlarmConfig, RearmPolicy};
use crate::types::Timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    Triggered {
        at: Timestamp,
        positive_frames: usize,
    },
    /// The active flag was cleared because the window fell back under the threshold.
    Rearmed { at: Timestamp },
}

/// Debounces per-frame intrusion indicators over a fixed window of recent
/// frames and decides when an alert fires.
///
/// A trigger requires more than `trigger_threshold` positive frames in the
/// window, no alert currently active, and more than `cooldown` elapsed since
/// the previous trigger. The cooldown is measured on the monotonic `tick`;
/// wall-clock time is only carried into the emitted events.
pub struct SlidingWindowAlarm {
    window: VecDeque<bool>,
    capacity: usize,
    positives: usize,
    trigger_threshold: usize,
    cooldown: Duration,
    rearm: RearmPolicy,
    require_full_window: bool,
    active: bool,
    last_fired: Option<Timestamp>,
    last_fired_tick: Option<Instant>,
}

impl SlidingWindowAlarm {
    pub fn new(config: &AlarmConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            positives: 0,
            trigger_threshold: config.trigger_threshold,
            cooldown: Duration::try_from_secs_f64(config.cooldown_secs).unwrap_or(Duration::ZERO),
            rearm: config.rearm,
            require_full_window: config.require_full_window,
            active: false,
            last_fired: None,
            last_fired_tick: None,
        }
    }

    pub fn observe(
        &mut self,
        frame_positive: bool,
        now: Timestamp,
        tick: Instant,
    ) -> Option<AlarmEvent> {
        if self.window.len() == self.capacity && self.window.pop_front() == Some(true) {
            self.positives -= 1;
        }
        self.window.push_back(frame_positive);
        if frame_positive {
            self.positives += 1;
        }

        let above = self.positives > self.trigger_threshold;

        if self.active && !above && self.rearm == RearmPolicy::BelowThreshold {
            self.active = false;
            tracing::debug!(positives = self.positives, "alarm re-armed");
            return Some(AlarmEvent::Rearmed { at: now });
        }

        if self.require_full_window && self.window.len() < self.capacity {
            return None;
        }

        let cooled_down = self
            .last_fired_tick
            .is_none_or(|last| tick.saturating_duration_since(last) > self.cooldown);

        if above && !self.active && cooled_down {
            self.active = true;
            self.last_fired = Some(now);
            self.last_fired_tick = Some(tick);
            return Some(AlarmEvent::Triggered {
                at: now,
                positive_frames: self.positives,
            });
        }

        None
    }

    /// Empties the window and clears the alert state, as at the start of a run.
    pub fn reset(&mut self) {
        self.window.clear();
        self.positives = 0;
        self.active = false;
        self.last_fired = None;
        self.last_fired_tick = None;
    }

    pub fn clear_active(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn positive_count(&self) -> usize {
        self.positives
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_fired(&self) -> Option<Timestamp> {
        self.last_fired
    }
}
