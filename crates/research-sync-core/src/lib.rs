//! research-sync-core - live progress for long-running research sessions
//!
//! Keeps a consistent progress snapshot of a server-side research session up
//! to date for a display surface, preferring the WebSocket push channel and
//! falling back to HTTP polling when it is unavailable.
//!
//! # Components
//!
//! - `snapshot`: the progress record and its terminal/elapsed helpers
//! - `pull`: one-shot HTTP requests (progress, active sessions, start)
//! - `push`: one WebSocket per session, decoded into snapshot events
//! - `controller`: push/poll failover, reconnection and termination
//! - `stage`: display helpers for labels, percentages and elapsed time
//!
//! # Example
//!
//! ```no_run
//! use research_sync_core::{SyncConfig, SyncController, SyncEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = SyncController::new(&SyncConfig::load())?;
//!     let mut events = controller.start("abc123");
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SyncEvent::Snapshot(s) => println!("{}%: {}", s.percentage, s.step),
//!             SyncEvent::Completed(_) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod pull;
pub mod push;
pub mod routes;
pub mod snapshot;
pub mod stage;

pub use config::SyncConfig;
pub use controller::{SessionView, SyncController, SyncEvent, SyncOptions, SyncState, Transport};
pub use error::{Result, SyncError};
pub use pull::{PullClient, ResearchRequest, SnapshotFetcher, StartResponse};
pub use push::{PushClient, PushConnection, PushConnector, PushEvent};
pub use routes::ApiRoutes;
pub use snapshot::{ProgressSource, Snapshot};
pub use stage::{display_percentage, format_elapsed, stage_label};
