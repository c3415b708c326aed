use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use super::{Alert, AlertChannel, AlertError, BoxFuture};
use crate::config::SirenConfig;

/// Plays the siren sound through an external audio player.
pub struct SirenPlayer {
    path: PathBuf,
    player: String,
    args: Vec<String>,
}

impl SirenPlayer {
    pub fn new(config: &SirenConfig) -> Self {
        Self {
            path: config.path.clone(),
            player: config.player.clone(),
            args: config.args.clone(),
        }
    }

    async fn play(&self) -> Result<(), AlertError> {
        if !self.path.exists() {
            return Err(AlertError::MissingResource(self.path.clone()));
        }

        let status = Command::new(&self.player)
            .args(&self.args)
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AlertError::PlayerNotFound(self.player.clone())
                } else {
                    AlertError::Io(e)
                }
            })?;

        if !status.success() {
            return Err(AlertError::Player(format!("{} exited with {}", self.player, status)));
        }
        Ok(())
    }
}

impl AlertChannel for SirenPlayer {
    fn name(&self) -> &'static str {
        "siren"
    }

    fn notify<'a>(&'a self, _alert: &'a Alert) -> BoxFuture<'a, Result<(), AlertError>> {
        Box::pin(self.play())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn player(path: PathBuf, program: &str) -> SirenPlayer {
        SirenPlayer::new(&SirenConfig {
            enabled: true,
            path,
            player: program.to_string(),
            args: Vec::new(),
        })
    }

    fn alert() -> Alert {
        Alert {
            at: Local::now(),
            positive_frames: 20,
        }
    }

    #[tokio::test]
    async fn test_missing_resource() {
        let siren = player(PathBuf::from("/nonexistent/Siren.wav"), "true");
        let err = siren.notify(&alert()).await.unwrap_err();
        assert!(matches!(err, AlertError::MissingResource(_)));
    }

    #[tokio::test]
    async fn test_player_exit_status() {
        let sound = tempfile::NamedTempFile::new().unwrap();

        let ok = player(sound.path().to_path_buf(), "true");
        assert!(ok.notify(&alert()).await.is_ok());

        let failing = player(sound.path().to_path_buf(), "false");
        assert!(matches!(
            failing.notify(&alert()).await.unwrap_err(),
            AlertError::Player(_)
        ));

        let missing = player(sound.path().to_path_buf(), "herdwatch-no-such-player");
        assert!(matches!(
            missing.notify(&alert()).await.unwrap_err(),
            AlertError::PlayerNotFound(_)
        ));
    }
}
