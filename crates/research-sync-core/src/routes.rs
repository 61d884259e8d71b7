//! Endpoint binding for the research API
//!
//! - `POST {base}/research/start`
//! - `GET {base}/research/progress/<sessionId>`
//! - `GET {base}/research/active-sessions`
//! - `ws(s)://{base}/research/ws/progress/<sessionId>`

use url::Url;

use crate::error::{Result, SyncError};

/// URL builder bound to one API base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoutes {
    base: Url,
}

impl ApiRoutes {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        match base.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(SyncError::Config(format!(
                    "unsupported API scheme '{other}' in {base}"
                )))
            }
        }
        if base.cannot_be_a_base() {
            return Err(SyncError::Config(format!("{base} cannot be used as an API base")));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn start(&self) -> Url {
        self.join(&["research", "start"])
    }

    pub fn progress(&self, session_id: &str) -> Url {
        self.join(&["research", "progress", session_id])
    }

    pub fn active_sessions(&self) -> Url {
        self.join(&["research", "active-sessions"])
    }

    /// Push endpoint; the scheme mirrors the API scheme (http → ws, https → wss)
    pub fn progress_ws(&self, session_id: &str) -> Url {
        let mut url = self.join(&["research", "ws", "progress", session_id]);
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // http(s) and ws(s) are both "special" schemes, so this cannot fail
        let _ = url.set_scheme(scheme);
        url
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
