//! Read-only scheduler snapshots for introspection.
//!
//! A snapshot is taken under the scheduler lock and rendered either as JSON
//! (HTTP surface) or as text (dump endpoint, logs).

use crate::session::{ClientId, SessionId, SessionKey, SessionPriority, SessionState, Uid};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One session as seen by the scheduler, in scheduling order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub uid: Uid,
    pub state: SessionState,
    pub last_progress: i32,
    pub await_count: u32,
    pub priority: SessionPriority,
    pub source_path: String,
    pub destination_path: String,
}

/// Full scheduler state at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// All sessions, top session first.
    pub sessions: Vec<SessionSnapshot>,
    /// Uid scheduling order, offline anchor last.
    pub uid_order: Vec<Uid>,
    pub current: Option<SessionKey>,
    pub resource_lost: bool,
    pub top_uids: Vec<Uid>,
}

impl SchedulerSnapshot {
    /// Plain-text rendering, one session per line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "========== Transcoding sessions ==========");
        let _ = writeln!(out, "  total sessions: {}", self.sessions.len());
        let _ = writeln!(
            out,
            "  current: {}",
            self.current
                .map(|key| key.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        let _ = writeln!(out, "  resource lost: {}", self.resource_lost);
        let _ = writeln!(out, "  uid order: {:?}", self.uid_order);
        let _ = writeln!(out, "  top uids: {:?}", self.top_uids);
        for session in &self.sessions {
            let _ = writeln!(
                out,
                "  {{client:{}, session:{}}} uid {} state {} progress {}% awaiting {} src {}",
                session.client_id,
                session.session_id,
                session.uid,
                session.state,
                session.last_progress,
                session.await_count,
                session.source_path,
            );
        }
        out
    }
}
