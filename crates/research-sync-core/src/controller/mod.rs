//! Sync Controller
//!
//! Tracks research sessions over the push channel, falls back to polling when
//! it fails, and stops once a terminal snapshot arrives.
//!
//! ```text
//! start ─► Connecting(push) ─► Live(push) ─┐
//!               │                          │ error / close
//!               └──────────────────────────┴─► Connecting(poll) ─► Live(poll)
//!
//! any terminal snapshot ─► Terminal      stop ─► Idle      reconnect ─► Connecting(push)
//! ```
//!
//! Display code reads [`SessionView`] copies and subscribes to [`SyncEvent`]s;
//! it never polls on its own.

mod driver;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

pub use session::{SessionView, SyncEvent, SyncState, Transport};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::pull::{PullClient, SnapshotFetcher};
use crate::push::{PushClient, PushConnector};
use driver::{Command, SessionDriver};
use session::SessionShared;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Poll cadence once degraded (default: 2s)
    pub poll_interval: Duration,
    /// Broadcast buffer per session
    pub event_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            event_capacity: 256,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            event_capacity: config.event_capacity,
        }
    }
}

struct SessionEntry {
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SessionEntry {
    /// After this returns nothing more is published for the session
    fn shut_down(self) {
        self.shared.deactivate();
        self.task.abort();
    }
}

struct Inner {
    fetcher: Arc<dyn SnapshotFetcher>,
    connector: Arc<dyn PushConnector>,
    options: SyncOptions,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Inner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sessions = self
            .sessions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in sessions.drain() {
            entry.shut_down();
        }
    }
}

/// Progress synchronization controller
///
/// Cheap to clone; all clones share the same sessions. Dropping the last
/// clone stops every tracked session.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

impl SyncController {
    /// Controller backed by the real HTTP and WebSocket clients
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let pull = PullClient::from_config(config)?;
        let push = PushClient::new(pull.routes().clone());
        Ok(Self::with_transports(
            Arc::new(pull),
            Arc::new(push),
            SyncOptions::from(config),
        ))
    }

    pub fn with_transports(
        fetcher: Arc<dyn SnapshotFetcher>,
        connector: Arc<dyn PushConnector>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                connector,
                options,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Begin tracking a session, push first
    ///
    /// A session that is already tracked (including a finished one) is
    /// discarded and tracked again from scratch. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, session_id: &str) -> broadcast::Receiver<SyncEvent> {
        let mut sessions = self.inner.sessions();
        if let Some(previous) = sessions.remove(session_id) {
            previous.shut_down();
        }

        let shared = Arc::new(SessionShared::new(
            session_id,
            self.inner.options.event_capacity,
        ));
        let events = shared.subscribe();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let driver = SessionDriver {
            session_id: session_id.to_string(),
            shared: shared.clone(),
            fetcher: self.inner.fetcher.clone(),
            connector: self.inner.connector.clone(),
            poll_interval: self.inner.options.poll_interval,
            commands: command_rx,
        };
        let task = tokio::spawn(driver.run());

        info!(session_id, "Tracking started");
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                shared,
                commands,
                task,
            },
        );
        events
    }

    /// Stop tracking and discard the session's handle
    ///
    /// No event fires and no view update happens after this returns, even if a
    /// response or frame is already on its way. Returns false for unknown
    /// sessions.
    pub fn stop(&self, session_id: &str) -> bool {
        let entry = self.inner.sessions().remove(session_id);
        match entry {
            Some(entry) => {
                entry.shut_down();
                info!(session_id, "Tracking stopped");
                true
            }
            None => false,
        }
    }

    /// Tear down the current transport and try push again
    ///
    /// Ignored (returns false) for unknown sessions and for sessions that
    /// already reached a terminal snapshot.
    pub fn reconnect(&self, session_id: &str) -> bool {
        self.send(session_id, Command::Reconnect)
    }

    /// One manual pull through the normal apply path, restarting the poll
    /// timer from its completion
    ///
    /// Only honoured while polling; the open push channel is the sole source
    /// of snapshots otherwise. Returns false when ignored.
    pub fn refetch(&self, session_id: &str) -> bool {
        self.send(session_id, Command::Refetch)
    }

    fn send(&self, session_id: &str, command: Command) -> bool {
        let sessions = self.inner.sessions();
        let Some(entry) = sessions.get(session_id) else {
            return false;
        };
        let state = entry.shared.view().state;
        let accepted = match command {
            Command::Reconnect => state != SyncState::Terminal,
            Command::Refetch => state.transport() == Some(Transport::Poll),
        };
        accepted && entry.commands.send(command).is_ok()
    }

    /// Copy of the session's current tracking state
    pub fn view(&self, session_id: &str) -> Option<SessionView> {
        let sessions = self.inner.sessions();
        sessions.get(session_id).map(|entry| entry.shared.view())
    }

    /// Additional subscriber for a tracked session
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<SyncEvent>> {
        let sessions = self.inner.sessions();
        sessions.get(session_id).map(|entry| entry.shared.subscribe())
    }

    pub fn tracked_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }
}
