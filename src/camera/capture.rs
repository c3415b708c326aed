use std::path::Path;

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use super::{Frame, FrameContent, FrameError, FrameSource};

enum Origin {
    Device(i32),
    File(String),
}

/// Frames from a local camera or a video file via OpenCV.
pub struct CaptureSource {
    capture: VideoCapture,
    origin: Origin,
    next_index: u64,
}

impl CaptureSource {
    pub fn camera(device: i32) -> Result<Self, FrameError> {
        let capture = VideoCapture::new(device, videoio::CAP_ANY).map_err(|e| FrameError::Open {
            source_name: format!("camera {device}"),
            reason: e.to_string(),
        })?;
        Self::opened(capture, Origin::Device(device))
    }

    pub fn file(path: &Path) -> Result<Self, FrameError> {
        let name = path.display().to_string();
        let capture =
            VideoCapture::from_file(&name, videoio::CAP_ANY).map_err(|e| FrameError::Open {
                source_name: name.clone(),
                reason: e.to_string(),
            })?;
        Self::opened(capture, Origin::File(name))
    }

    fn opened(capture: VideoCapture, origin: Origin) -> Result<Self, FrameError> {
        let is_open = capture.is_opened().unwrap_or(false);
        let source = Self {
            capture,
            origin,
            next_index: 0,
        };
        if !is_open {
            return Err(FrameError::Open {
                source_name: source.describe(),
                reason: "device or file could not be opened".to_string(),
            });
        }
        Ok(source)
    }
}

impl FrameSource for CaptureSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let index = self.next_index;
        self.next_index += 1;

        let mut mat = Mat::default();
        let grabbed = self.capture.read(&mut mat).map_err(|e| FrameError::Decode {
            index,
            reason: e.to_string(),
        })?;

        if !grabbed || mat.empty() {
            return match self.origin {
                Origin::File(_) => Ok(None),
                Origin::Device(_) => Err(FrameError::Decode {
                    index,
                    reason: "camera returned no frame".to_string(),
                }),
            };
        }

        Ok(Some(Frame {
            index,
            content: FrameContent::Image(mat),
        }))
    }

    fn describe(&self) -> String {
        match &self.origin {
            Origin::Device(d) => format!("camera {d}"),
            Origin::File(f) => format!("file {f}"),
        }
    }
}
