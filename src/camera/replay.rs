use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use super::{Frame, FrameContent, FrameError, FrameSource};

/// One detector output as stored in a replay file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedDetection {
    pub class_id: usize,
    pub confidence: f32,
    /// `[x0, y0, x1, y1]`, frame-relative.
    #[serde(default)]
    pub bbox: [f32; 4],
}

#[derive(Deserialize)]
struct RecordedFrame {
    #[serde(default)]
    detections: Vec<RecordedDetection>,
}

/// Plays back per-frame detections from a JSON-lines file, one frame per
/// non-blank line.
pub struct ReplaySource {
    path: PathBuf,
    reader: BufReader<File>,
    line: Vec<u8>,
    next_index: u64,
    frame_interval: Duration,
}

impl ReplaySource {
    pub fn open(path: &Path, frame_interval_ms: u64) -> Result<Self, FrameError> {
        let file = File::open(path).map_err(|e| FrameError::Open {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            line: Vec::new(),
            next_index: 0,
            frame_interval: Duration::from_millis(frame_interval_ms),
        })
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        // Raw bytes: a line that is not UTF-8 is a bad frame, not a broken stream.
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            if !self.line.iter().all(u8::is_ascii_whitespace) {
                break;
            }
        }

        let index = self.next_index;
        self.next_index += 1;

        if !self.frame_interval.is_zero() {
            thread::sleep(self.frame_interval);
        }

        let recorded: RecordedFrame =
            serde_json::from_slice(&self.line).map_err(|e| FrameError::Decode {
                index,
                reason: e.to_string(),
            })?;

        Ok(Some(Frame {
            index,
            content: FrameContent::Recorded(recorded.detections),
        }))
    }

    fn describe(&self) -> String {
        format!("replay {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_replay(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn detections(frame: Frame) -> Vec<RecordedDetection> {
        match frame.content {
            FrameContent::Recorded(d) => d,
            #[allow(unreachable_patterns)]
            _ => panic!("expected recorded frame"),
        }
    }

    #[test]
    fn test_reads_frames_until_end() {
        let file = write_replay(
            "{\"detections\":[{\"class_id\":12,\"confidence\":0.5,\"bbox\":[0.1,0.2,0.3,0.4]}]}\n\
             \n\
             {\"detections\":[]}\n",
        );
        let mut source = ReplaySource::open(file.path(), 0).unwrap();

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 0);
        let d = detections(first);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].class_id, 12);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert!(detections(second).is_empty());

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_bad_line_is_recoverable() {
        let file = write_replay("not json\n{}\n");
        let mut source = ReplaySource::open(file.path(), 0).unwrap();

        let err = source.next_frame().err().unwrap();
        assert!(err.is_recoverable());
        assert!(matches!(err, FrameError::Decode { index: 0, .. }));

        let next = source.next_frame().unwrap().unwrap();
        assert_eq!(next.index, 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_a_bad_frame() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"detections\":[]}\n").unwrap();
        file.write_all(b"{\"detections\":[\xff\xfe]}\n").unwrap();
        file.write_all(b"{\"detections\":[{\"class_id\":8,\"confidence\":0.9}]}").unwrap();
        let mut source = ReplaySource::open(file.path(), 0).unwrap();

        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);

        let err = source.next_frame().err().unwrap();
        assert!(matches!(err, FrameError::Decode { index: 1, .. }));
        assert!(err.is_recoverable());

        // Last line has no trailing newline.
        let last = source.next_frame().unwrap().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(detections(last)[0].class_id, 8);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let err = ReplaySource::open(Path::new("/nonexistent/frames.jsonl"), 0)
            .err()
            .unwrap();
        assert!(matches!(err, FrameError::Open { .. }));
        assert!(!err.is_recoverable());
    }
}
