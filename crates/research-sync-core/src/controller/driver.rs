//! Session driver
//!
//! One task per tracked session. It owns the active transport and is the only
//! place transitions happen, so push events, poll ticks and commands for a
//! session are handled strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::session::{SessionShared, SyncEvent, SyncState, Transport};
use crate::error::{Result, SyncError};
use crate::pull::SnapshotFetcher;
use crate::push::{PushConnection, PushConnector, PushEvent};
use crate::snapshot::Snapshot;

/// Floor for the poll cadence; a zero period would stall the timer
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Reconnect,
    Refetch,
}

enum ActiveTransport {
    Push(PushConnection),
    Poll(Interval),
}

enum Step {
    Command(Option<Command>),
    Push(Option<PushEvent>),
    Tick,
}

enum Flow {
    Continue,
    FailOver,
    Reconnect,
    Finish,
}

pub(crate) struct SessionDriver {
    pub(crate) session_id: String,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) fetcher: Arc<dyn SnapshotFetcher>,
    pub(crate) connector: Arc<dyn PushConnector>,
    pub(crate) poll_interval: Duration,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionDriver {
    pub(crate) async fn run(mut self) {
        let Some(mut active) = self.connect_push() else {
            return;
        };

        loop {
            let step = match &mut active {
                ActiveTransport::Push(conn) => tokio::select! {
                    cmd = self.commands.recv() => Step::Command(cmd),
                    event = conn.next_event() => Step::Push(event),
                },
                ActiveTransport::Poll(ticker) => tokio::select! {
                    cmd = self.commands.recv() => Step::Command(cmd),
                    _ = ticker.tick() => Step::Tick,
                },
            };

            let flow = match step {
                Step::Command(cmd) => self.on_command(cmd, &mut active).await,
                Step::Push(event) => self.on_push_event(event),
                Step::Tick => self.poll(&mut active).await,
            };

            let next = match flow {
                Flow::Continue => continue,
                Flow::Finish => break,
                Flow::FailOver => {
                    active.shut_down();
                    self.start_polling()
                }
                Flow::Reconnect => {
                    active.shut_down();
                    self.connect_push()
                }
            };
            match next {
                Some(transport) => active = transport,
                None => break,
            }
        }

        active.shut_down();
        debug!(session_id = %self.session_id, "Session driver finished");
    }

    fn connect_push(&self) -> Option<ActiveTransport> {
        let published = self.shared.commit(|view, events| {
            view.state = SyncState::Connecting(Transport::Push);
            view.is_live = true;
            events.push(SyncEvent::StateChanged {
                state: view.state,
                is_live: view.is_live,
            });
        });
        if !published {
            return None;
        }
        info!(session_id = %self.session_id, "Connecting push channel");
        Some(ActiveTransport::Push(self.connector.open(&self.session_id)))
    }

    fn start_polling(&self) -> Option<ActiveTransport> {
        let published = self.shared.commit(|view, events| {
            view.state = SyncState::Connecting(Transport::Poll);
            view.is_live = false;
            events.push(SyncEvent::StateChanged {
                state: view.state,
                is_live: view.is_live,
            });
        });
        if !published {
            return None;
        }
        let period = self.poll_interval.max(MIN_POLL_INTERVAL);
        info!(
            session_id = %self.session_id,
            interval_ms = period.as_millis() as u64,
            "Push channel lost, falling back to polling"
        );

        // First tick completes immediately
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(ActiveTransport::Poll(ticker))
    }

    async fn on_command(&self, cmd: Option<Command>, active: &mut ActiveTransport) -> Flow {
        match cmd {
            Some(Command::Reconnect) => {
                info!(session_id = %self.session_id, "Reconnect requested");
                Flow::Reconnect
            }
            Some(Command::Refetch) => {
                // Push stays the only producer while it is open
                if matches!(active, ActiveTransport::Push(_)) {
                    debug!(session_id = %self.session_id, "Refetch ignored on push channel");
                    return Flow::Continue;
                }
                self.poll(active).await
            }
            // Controller side dropped
            None => Flow::Finish,
        }
    }

    /// One pull; the next tick is a full period after it completes, so ticks
    /// that fell due during the request are dropped rather than fired late.
    async fn poll(&self, active: &mut ActiveTransport) -> Flow {
        let result = self.fetcher.fetch_snapshot(&self.session_id).await;
        if let ActiveTransport::Poll(ticker) = active {
            ticker.reset();
        }
        self.apply(result, Transport::Poll)
    }

    fn on_push_event(&self, event: Option<PushEvent>) -> Flow {
        match event {
            Some(PushEvent::Snapshot(snapshot)) => self.apply(Ok(snapshot), Transport::Push),
            Some(PushEvent::TransportError(e)) => {
                if self.record_error(e) {
                    Flow::FailOver
                } else {
                    Flow::Finish
                }
            }
            Some(PushEvent::Closed) | None => Flow::FailOver,
        }
    }

    /// Replace the last snapshot wholesale; errors keep it untouched
    fn apply(&self, result: Result<Snapshot>, transport: Transport) -> Flow {
        let snapshot = match result {
            Ok(s) if s.session_id != self.session_id => {
                return self.on_apply_error(SyncError::Decode(format!(
                    "snapshot for session '{}' delivered to '{}'",
                    s.session_id, self.session_id
                )));
            }
            Ok(s) => s,
            Err(e) => return self.on_apply_error(e),
        };

        let terminal = snapshot.is_terminal();
        debug!(
            session_id = %self.session_id,
            transport = transport.as_str(),
            percentage = snapshot.percentage,
            terminal,
            "Applying snapshot"
        );

        let published = self.shared.commit(|view, events| {
            view.last_error = None;
            if terminal {
                view.state = SyncState::Terminal;
                view.is_live = false;
                events.push(SyncEvent::StateChanged {
                    state: view.state,
                    is_live: false,
                });
                events.push(SyncEvent::Completed(snapshot.clone()));
            } else {
                let live = SyncState::Live(transport);
                if view.state != live {
                    view.state = live;
                    events.push(SyncEvent::StateChanged {
                        state: live,
                        is_live: view.is_live,
                    });
                }
                events.push(SyncEvent::Snapshot(snapshot.clone()));
            }
            view.snapshot = Some(snapshot);
        });

        if !published {
            return Flow::Finish;
        }
        if terminal {
            info!(session_id = %self.session_id, "Session complete");
            return Flow::Finish;
        }
        Flow::Continue
    }

    fn on_apply_error(&self, error: SyncError) -> Flow {
        warn!(session_id = %self.session_id, error = %error, "Progress update failed");
        if self.record_error(error) {
            Flow::Continue
        } else {
            Flow::Finish
        }
    }

    fn record_error(&self, error: SyncError) -> bool {
        self.shared.commit(|view, events| {
            view.last_error = Some(error.clone());
            events.push(SyncEvent::Error(error));
        })
    }
}

impl ActiveTransport {
    /// Release the push socket before anything replaces it. An interval
    /// does nothing unless polled, so it is released by dropping.
    fn shut_down(&mut self) {
        if let ActiveTransport::Push(conn) = self {
            conn.close();
        }
    }
}
