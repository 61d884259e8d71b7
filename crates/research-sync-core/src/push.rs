//! Push Client
//!
//! One WebSocket per tracked session at `ws(s)://<base>/research/ws/progress/<id>`.
//! Every text or binary frame is expected to carry one snapshot.
//!
//! Events, in order, for one connection:
//! - `Snapshot` for every frame that decodes (malformed frames are dropped)
//! - at most one `TransportError`
//! - exactly one `Closed`, always last

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SyncError};
use crate::routes::ApiRoutes;
use crate::snapshot::Snapshot;

const EVENT_BUFFER: usize = 64;

/// Event reported by a push connection
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Snapshot(Snapshot),
    TransportError(SyncError),
    Closed,
}

/// Opens push connections (the controller's streaming seam)
pub trait PushConnector: Send + Sync {
    /// Start connecting; failures are reported as events, never returned
    fn open(&self, session_id: &str) -> PushConnection;
}

/// Handle to one streaming connection
///
/// `close()` is idempotent and immediate: the connection task is aborted and
/// no event is yielded afterwards, including ones already buffered.
pub struct PushConnection {
    events: mpsc::Receiver<PushEvent>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl PushConnection {
    pub fn new(events: mpsc::Receiver<PushEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            events,
            task,
            closed: false,
        }
    }

    /// Next event; `None` once closed or after `Closed` has been consumed
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// WebSocket push client bound to one API base
#[derive(Debug, Clone)]
pub struct PushClient {
    routes: ApiRoutes,
}

impl PushClient {
    pub fn new(routes: ApiRoutes) -> Self {
        Self { routes }
    }

    /// Must be called from within a tokio runtime
    pub fn open(&self, session_id: &str) -> PushConnection {
        let url = self.routes.progress_ws(session_id);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let session_id = session_id.to_string();
        let task = tokio::spawn(async move {
            run_connection(url, session_id, tx).await;
        });
        PushConnection::new(rx, Some(task))
    }
}

impl PushConnector for PushClient {
    fn open(&self, session_id: &str) -> PushConnection {
        PushClient::open(self, session_id)
    }
}

async fn run_connection(url: Url, session_id: String, tx: mpsc::Sender<PushEvent>) {
    if let Err(e) = stream_snapshots(&url, &session_id, &tx).await {
        warn!(session_id = %session_id, error = %e, "Push connection failed");
        let _ = tx.send(PushEvent::TransportError(e)).await;
    }
    debug!(session_id = %session_id, "Push connection closed");
    let _ = tx.send(PushEvent::Closed).await;
}

async fn stream_snapshots(
    url: &Url,
    session_id: &str,
    tx: &mpsc::Sender<PushEvent>,
) -> Result<()> {
    let (mut ws_stream, _) = connect_async(url.as_str()).await.map_err(ws_error)?;
    info!(session_id, %url, "Push connection established");

    while let Some(msg) = ws_stream.next().await {
        let payload = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(frame)) => {
                debug!(session_id, ?frame, "Push connection closed by peer");
                return Ok(());
            }
            Ok(_) => continue,
            Err(e) => return Err(ws_error(e)),
        };

        match Snapshot::from_json(&payload) {
            Ok(snapshot) => {
                if tx.send(PushEvent::Snapshot(snapshot)).await.is_err() {
                    // Receiver gone: the connection was closed locally
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "Dropping malformed push frame");
            }
        }
    }

    Ok(())
}

fn ws_error(err: WsError) -> SyncError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            SyncError::Protocol {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("handshake rejected")
                    .to_string(),
            }
        }
        other => SyncError::transport(other),
    }
}
