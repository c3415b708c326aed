use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;

use crate::alert::{Alert, AlertDispatcher};
use crate::camera::{FrameError, FrameSource};
use crate::config::SourceConfig;
use crate::engine::{AlarmEvent, Engine, EngineSnapshot, FpsMeter};
use crate::storage::EventLog;
use crate::types::Timestamp;

use super::Detector;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("frame source failed: {0}")]
    Source(#[from] FrameError),
    #[error("{count} consecutive frames failed, last error: {last}")]
    TooManyFrameErrors { count: u32, last: String },
    #[error("detection worker panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    EndOfStream,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reason: StopReason,
    pub frames: u64,
    pub sessions: usize,
    pub average_fps: f64,
}

/// Published by the worker after every frame; readers only ever see a copy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub source: Option<String>,
    pub started_at: Option<Timestamp>,
    pub fps: f64,
    pub engine: EngineSnapshot,
}

/// Stop request and completion flags shared between a run's worker and its
/// controller.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    shutdown: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the first request.
    pub fn request_stop(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Set by the worker once the run has fully wound down.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn same_run(&self, other: &RunControl) -> bool {
        Arc::ptr_eq(&self.shutdown, &other.shutdown)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Everything a run needs, opened and validated before the worker starts.
pub struct RunParts {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub engine: Engine,
    pub dispatcher: AlertDispatcher,
}

struct DetectionRunner {
    parts: RunParts,
    fps: FpsMeter,
    status: Arc<RwLock<StatusSnapshot>>,
    events: EventLog,
    max_consecutive_errors: u32,
    loop_pause: Duration,
    started_at: Timestamp,
}

impl DetectionRunner {
    fn run(mut self, control: &RunControl) -> Result<RunSummary, RunError> {
        let source = self.parts.source.describe();
        self.parts.engine.reset();
        self.fps = FpsMeter::start();
        self.publish(true);
        tracing::info!(source = %source, "detection loop started");

        let result = self.run_loop(control);

        let closed = self.parts.engine.finish(Local::now());
        if !closed.is_empty() {
            tracing::debug!(sessions = closed.len(), "closed sessions open at stop");
        }
        self.fps.stop();
        let abandoned = self.parts.dispatcher.drain_blocking();
        if abandoned > 0 {
            tracing::warn!(abandoned, "alert deliveries abandoned at stop");
        }
        self.publish(false);

        let average_fps = self.fps.average_fps();
        match &result {
            Ok(reason) => {
                tracing::info!(
                    source = %source,
                    reason = ?reason,
                    sessions = self.parts.engine.report().len(),
                    average_fps = format!("{:.2}", average_fps),
                    "detection loop stopped"
                );
                self.events
                    .info(format!("Processing complete. Average FPS: {:.2}", average_fps));
            }
            Err(e) => {
                self.events.error(format!("Error during detection: {}", e));
            }
        }

        result.map(|reason| RunSummary {
            reason,
            frames: self.fps.total_frames(),
            sessions: self.parts.engine.report().len(),
            average_fps,
        })
    }

    fn run_loop(&mut self, control: &RunControl) -> Result<StopReason, RunError> {
        let mut consecutive_errors = 0u32;

        while !control.stop_requested() {
            let frame = match self.parts.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.events.warning("End of video reached");
                    return Ok(StopReason::EndOfStream);
                }
                Err(e) if e.is_recoverable() => {
                    self.frame_failed(&mut consecutive_errors, e.to_string())?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let detections = match self.parts.detector.infer(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    self.frame_failed(&mut consecutive_errors, e.to_string())?;
                    continue;
                }
            };
            consecutive_errors = 0;

            let now = Local::now();
            let decision = self.parts.engine.observe(&detections, now, Instant::now());

            for class in &decision.opened {
                self.events
                    .info(format!("{} detected at {}", class, now.format("%H:%M:%S")));
            }
            if let Some(AlarmEvent::Triggered {
                at,
                positive_frames,
            }) = decision.alarm
            {
                self.parts.dispatcher.on_triggered(Alert {
                    at,
                    positive_frames,
                });
            }

            self.fps.update();
            self.publish(true);

            tracing::trace!(
                frame = frame.index,
                detections = detections.len(),
                classes = decision.classes.len(),
                "frame processed"
            );

            if !self.loop_pause.is_zero() {
                thread::sleep(self.loop_pause);
            }
        }

        Ok(StopReason::Requested)
    }

    fn frame_failed(&self, consecutive: &mut u32, error: String) -> Result<(), RunError> {
        *consecutive += 1;
        tracing::warn!(consecutive = *consecutive, error = %error, "skipping bad frame");
        if *consecutive > self.max_consecutive_errors {
            return Err(RunError::TooManyFrameErrors {
                count: *consecutive,
                last: error,
            });
        }
        Ok(())
    }

    fn publish(&self, running: bool) {
        let snapshot = StatusSnapshot {
            running,
            source: Some(self.parts.source.describe()),
            started_at: Some(self.started_at),
            fps: self.fps.fps(),
            engine: self.parts.engine.snapshot(),
        };
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Runs the capture → detect → decide loop on a blocking worker until the
/// stream ends, a fatal error occurs, or a stop is requested on `control`.
/// The worker resets the engine (and so the report) before the first frame.
pub fn spawn_runner(
    parts: RunParts,
    settings: &SourceConfig,
    status: Arc<RwLock<StatusSnapshot>>,
    events: EventLog,
    control: RunControl,
) -> tokio::task::JoinHandle<Result<RunSummary, RunError>> {
    let runner = DetectionRunner {
        parts,
        fps: FpsMeter::start(),
        status,
        events,
        max_consecutive_errors: settings.max_consecutive_errors,
        loop_pause: Duration::from_millis(settings.loop_pause_ms),
        started_at: Local::now(),
    };

    tokio::task::spawn_blocking(move || {
        let result = runner.run(&control);
        control.mark_finished();
        result
    })
}
