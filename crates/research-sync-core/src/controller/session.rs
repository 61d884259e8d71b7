//! Per-session tracking handle
//!
//! The view is only mutated, and events only emitted, while holding the gate.
//! Once the gate is deactivated nothing else is published for the session.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::snapshot::Snapshot;

/// Update channel in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Push,
    Poll,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Push => "push",
            Transport::Poll => "poll",
        }
    }
}

/// Controller state for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Connecting(Transport),
    Live(Transport),
    Terminal,
}

impl SyncState {
    /// Active transport, if any
    pub fn transport(&self) -> Option<Transport> {
        match self {
            SyncState::Connecting(t) | SyncState::Live(t) => Some(*t),
            SyncState::Idle | SyncState::Terminal => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Connecting(Transport::Push) => "connecting_push",
            SyncState::Connecting(Transport::Poll) => "connecting_poll",
            SyncState::Live(Transport::Push) => "live_push",
            SyncState::Live(Transport::Poll) => "live_poll",
            SyncState::Terminal => "terminal",
        }
    }
}

/// Read-only copy of a session's tracking state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session_id: String,
    pub state: SyncState,
    /// Last validly decoded snapshot; survives transport failures
    pub snapshot: Option<Snapshot>,
    pub last_error: Option<SyncError>,
    /// False while degraded to polling
    pub is_live: bool,
}

impl SessionView {
    pub(crate) fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: SyncState::Idle,
            snapshot: None,
            last_error: None,
            is_live: false,
        }
    }

    pub fn transport(&self) -> Option<Transport> {
        self.state.transport()
    }

    /// Connecting/Live with an unresolved error
    pub fn is_errored(&self) -> bool {
        self.last_error.is_some() && self.state.transport().is_some()
    }

    /// Tracking, but no snapshot has arrived yet
    pub fn is_loading(&self) -> bool {
        self.snapshot.is_none() && self.state.transport().is_some()
    }
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged { state: SyncState, is_live: bool },
    Snapshot(Snapshot),
    /// Final notification for a session; carries the terminal snapshot
    Completed(Snapshot),
    Error(SyncError),
}

struct Gate {
    active: bool,
    view: SessionView,
}

pub(crate) struct SessionShared {
    gate: Mutex<Gate>,
    events: broadcast::Sender<SyncEvent>,
}

impl SessionShared {
    pub(crate) fn new(session_id: &str, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            gate: Mutex::new(Gate {
                active: true,
                view: SessionView::new(session_id),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the view and emit the resulting events as one step.
    /// Returns false once the session has been stopped.
    pub(crate) fn commit<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut SessionView, &mut Vec<SyncEvent>),
    {
        let mut gate = self.lock();
        if !gate.active {
            return false;
        }
        let mut events = Vec::new();
        update(&mut gate.view, &mut events);
        for event in events {
            // No subscribers is fine; the view still holds the data
            let _ = self.events.send(event);
        }
        true
    }

    pub(crate) fn deactivate(&self) {
        let mut gate = self.lock();
        gate.active = false;
        gate.view.state = SyncState::Idle;
        gate.view.is_live = false;
    }

    pub(crate) fn view(&self) -> SessionView {
        self.lock().view.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}
