#[cfg(feature = "vision")]
mod capture;
mod replay;

use thiserror::Error;

use crate::config::{SourceConfig, SourceKind};

#[cfg(feature = "vision")]
pub use capture::CaptureSource;
pub use replay::{RecordedDetection, ReplaySource};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to open frame source {source_name}: {reason}")]
    Open { source_name: String, reason: String },
    #[error("source kind {0:?} needs the 'vision' feature")]
    Unsupported(SourceKind),
    #[error("frame {index} could not be decoded: {reason}")]
    Decode { index: u64, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// A single bad frame; the loop may skip it and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Decode { .. })
    }
}

pub enum FrameContent {
    /// Detections recorded ahead of time; no pixels to run inference on.
    Recorded(Vec<RecordedDetection>),
    #[cfg(feature = "vision")]
    Image(opencv::core::Mat),
}

pub struct Frame {
    pub index: u64,
    pub content: FrameContent,
}

/// Lazy sequence of frames. `Ok(None)` marks a normal end of stream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;

    fn describe(&self) -> String;
}

pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>, FrameError> {
    match config.kind {
        SourceKind::Replay => {
            let path = config.path.as_ref().ok_or_else(|| FrameError::Open {
                source_name: "replay".to_string(),
                reason: "no path configured".to_string(),
            })?;
            Ok(Box::new(ReplaySource::open(path, config.frame_interval_ms)?))
        }
        #[cfg(feature = "vision")]
        SourceKind::Camera => Ok(Box::new(CaptureSource::camera(config.device)?)),
        #[cfg(feature = "vision")]
        SourceKind::File => {
            let path = config.path.as_ref().ok_or_else(|| FrameError::Open {
                source_name: "file".to_string(),
                reason: "no path configured".to_string(),
            })?;
            Ok(Box::new(CaptureSource::file(path)?))
        }
        #[cfg(not(feature = "vision"))]
        kind => Err(FrameError::Unsupported(kind)),
    }
}
