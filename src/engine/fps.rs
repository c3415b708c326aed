use std::time::{Duration, Instant};

const INTERVAL: Duration = Duration::from_secs(1);

/// Frame-rate bookkeeping for the processing loop.
///
/// `fps()` reports the rate over the most recently completed one-second
/// interval; `average_fps()` covers the whole run.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    run_start: Instant,
    run_end: Option<Instant>,
    interval_start: Instant,
    interval_frames: u64,
    total_frames: u64,
    current_fps: f64,
}

impl FpsMeter {
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(now: Instant) -> Self {
        Self {
            run_start: now,
            run_end: None,
            interval_start: now,
            interval_frames: 0,
            total_frames: 0,
            current_fps: 0.0,
        }
    }

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&mut self, now: Instant) {
        self.interval_frames += 1;
        self.total_frames += 1;

        let span = now.saturating_duration_since(self.interval_start);
        if span >= INTERVAL {
            self.current_fps = self.interval_frames as f64 / span.as_secs_f64();
            self.interval_frames = 0;
            self.interval_start = now;
        }
    }

    pub fn fps(&self) -> f64 {
        self.current_fps
    }

    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn stop_at(&mut self, now: Instant) {
        if self.run_end.is_none() {
            self.run_end = Some(now);
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.run_end {
            Some(end) => end.saturating_duration_since(self.run_start),
            None => self.run_start.elapsed(),
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_frames as f64 / secs
    }
}
