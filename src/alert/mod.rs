//! Side effects fired when the alarm triggers. Each channel runs in its own
//! task so delivery never stalls the detection loop, and a failing channel
//! never affects the others. Deliveries still in flight when a run ends are
//! waited for up to a bound, then reported as abandoned.

mod siren;
mod sms;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

pub use siren::SirenPlayer;
pub use sms::SmsClient;

use crate::config::AlertsConfig;
use crate::storage::EventLog;
use crate::types::Timestamp;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("siren resource not found: {0}")]
    MissingResource(PathBuf),
    #[error("player not found: {0}")]
    PlayerNotFound(String),
    #[error("player failed: {0}")]
    Player(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sms request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub at: Timestamp,
    pub positive_frames: usize,
}

impl Alert {
    pub fn message(&self) -> String {
        format!(
            "Alert! Animal intrusion detected on your farm at {}.",
            self.at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// A notification capability.
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), AlertError>>;
}

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
    runtime: Handle,
    events: EventLog,
    tasks: Mutex<JoinSet<()>>,
    drain_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(runtime: Handle, events: EventLog) -> Self {
        Self {
            channels: Vec::new(),
            runtime,
            events,
            tasks: Mutex::new(JoinSet::new()),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn from_config(config: &AlertsConfig, runtime: Handle, events: EventLog) -> Self {
        let mut dispatcher = Self::new(runtime, events)
            .with_drain_timeout(Duration::from_secs(config.drain_timeout_secs));
        if config.siren.enabled {
            dispatcher = dispatcher.with_channel(Arc::new(SirenPlayer::new(&config.siren)));
        }
        if config.sms.enabled {
            dispatcher = dispatcher.with_channel(Arc::new(SmsClient::new(&config.sms)));
        }
        dispatcher
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Starts one delivery task per channel and returns immediately with the
    /// number of tasks started.
    pub fn on_triggered(&self, alert: Alert) -> usize {
        self.events.warning(format!(
            "Animal intrusion detected at {}",
            alert.at.format("%Y-%m-%d %H:%M:%S")
        ));

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let events = self.events.clone();
            let alert = alert.clone();
            tasks.spawn_on(
                async move {
                    match channel.notify(&alert).await {
                        Ok(()) => {
                            tracing::info!(channel = channel.name(), "alert delivered");
                        }
                        Err(e) => {
                            tracing::warn!(channel = channel.name(), error = %e, "alert delivery failed");
                            events.warning(format!("{} alert failed: {}", channel.name(), e));
                        }
                    }
                },
                &self.runtime,
            );
        }
        self.channels.len()
    }

    /// Waits for in-flight deliveries, at most the drain timeout. Anything
    /// still running is aborted and logged. Returns how many were abandoned.
    pub async fn drain(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return 0;
        }

        let joined = tokio::time::timeout(self.drain_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "alert task failed");
                    self.events.error(format!("Alert task failed: {}", e));
                }
            }
        })
        .await;

        if joined.is_ok() {
            return 0;
        }
        let pending = tasks.len();
        tasks.abort_all();
        self.events.warning(format!(
            "{} alert deliveries still pending after {}s were abandoned",
            pending,
            self.drain_timeout.as_secs()
        ));
        pending
    }

    /// `drain` for callers on a blocking thread, such as the detection worker.
    /// Must not be called from inside the async runtime.
    pub fn drain_blocking(&self) -> usize {
        self.runtime.block_on(self.drain())
    }
}
