use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::alert::AlertDispatcher;
use crate::analytics::{
    open_detector, spawn_runner, DetectorError, RunControl, RunError, RunParts, RunSummary,
    StatusSnapshot,
};
use crate::camera::{open_source, FrameError};
use crate::config::Config;
use crate::engine::Engine;
use crate::storage::{export_report, EventLog, ExportError, LogEntry, ReportStore};
use crate::types::Session;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("detection is already running")]
    AlreadyRunning,
    #[error("could not open frame source: {0}")]
    Source(#[from] FrameError),
    #[error("could not initialise detector: {0}")]
    Detector(#[from] DetectorError),
}

struct ActiveRun {
    control: RunControl,
    /// Taken by `wait`.
    handle: Option<JoinHandle<Result<RunSummary, RunError>>>,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        !self.control.is_finished() && self.handle.as_ref().is_none_or(|h| !h.is_finished())
    }
}

/// Start/stop control over detection runs, shared by every front-end.
///
/// The worker is the only writer of run state; this handle reads the
/// published status, the report and the event log.
#[derive(Clone)]
pub struct DetectionService {
    config: Arc<Config>,
    run: Arc<Mutex<Option<ActiveRun>>>,
    status: Arc<RwLock<StatusSnapshot>>,
    report: ReportStore,
    events: EventLog,
}

impl DetectionService {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            run: Arc::new(Mutex::new(None)),
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
            report: ReportStore::new(),
            events: EventLog::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the source and detector and starts a fresh run. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> Result<(), StartError> {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run.as_ref().is_some_and(ActiveRun::is_live) {
            return Err(StartError::AlreadyRunning);
        }

        let source = open_source(&self.config.source).map_err(|e| {
            self.events.error(format!("Could not open video source: {}", e));
            StartError::from(e)
        })?;
        let detector = open_detector(&self.config).map_err(|e| {
            self.events.error(format!("Could not load the model: {}", e));
            StartError::from(e)
        })?;
        let description = source.describe();

        let parts = RunParts {
            source,
            detector,
            engine: Engine::new(&self.config, self.report.clone()),
            dispatcher: AlertDispatcher::from_config(
                &self.config.alerts,
                Handle::current(),
                self.events.clone(),
            ),
        };

        let control = RunControl::new();
        let handle = spawn_runner(
            parts,
            &self.config.source,
            Arc::clone(&self.status),
            self.events.clone(),
            control.clone(),
        );
        *run = Some(ActiveRun {
            control,
            handle: Some(handle),
        });

        self.events.info(format!("Detection started: {}", description));
        Ok(())
    }

    /// Asks the worker to stop after its current frame. Returns `false`
    /// when no run was active, so repeated calls are harmless.
    pub fn stop(&self) -> bool {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = run.as_ref() else {
            return false;
        };
        if !active.is_live() || !active.control.request_stop() {
            return false;
        }
        self.events.info("Detection stopped by user");
        true
    }

    /// Waits for the current run to end and returns its outcome. Returns
    /// `None` when there is no run or another caller is already waiting.
    pub async fn wait(&self) -> Option<Result<RunSummary, RunError>> {
        let (handle, control) = {
            let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            let active = run.as_mut()?;
            (active.handle.take()?, active.control.clone())
        };

        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(RunError::Panicked(e.to_string())),
        };

        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run
            .as_ref()
            .is_some_and(|r| r.control.same_run(&control))
        {
            *run = None;
        }
        Some(outcome)
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(ActiveRun::is_live)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completed sessions, optionally restricted to `classes`.
    pub fn sessions(&self, classes: Option<&[String]>) -> Vec<Session> {
        match classes {
            Some(classes) => self.report.filter_by_class(classes),
            None => self.report.sessions(),
        }
    }

    pub fn events(&self) -> Vec<LogEntry> {
        self.events.entries()
    }

    /// Exports the sessions of `classes` (every tracked class when `None`).
    pub fn export(&self, path: &Path, classes: Option<&[String]>) -> Result<usize, ExportError> {
        let included: Vec<String> = match classes {
            Some(classes) => self
                .config
                .detection
                .tracked_classes
                .iter()
                .filter(|c| classes.contains(c))
                .cloned()
                .collect(),
            None => self.config.detection.tracked_classes.clone(),
        };

        match export_report(&self.report.sessions(), &included, path) {
            Ok(count) => {
                self.events
                    .info(format!("Report exported: {}", path.display()));
                Ok(count)
            }
            Err(ExportError::NoSessions) => {
                self.events
                    .warning("No detections with the current filters to report");
                Err(ExportError::NoSessions)
            }
            Err(e) => {
                self.events.error(format!("Error exporting report: {}", e));
                Err(e)
            }
        }
    }
}
