//! Session types and the keyed session registry.
//!
//! A session is a single transcoding request tracked by the scheduler for its
//! full lifetime. Sessions are identified by a `(client, session)` key pair
//! assigned by the submitting client.

use crate::client::ClientCallback;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;
use std::sync::Weak;
use thiserror::Error;

/// Identifier of a connected client process.
pub type ClientId = i64;

/// Client-assigned identifier of a session, dense within that client.
pub type SessionId = i32;

/// Application uid a session is scheduled on behalf of.
pub type Uid = i32;

/// Sentinel uid for sessions not tied to any foreground application.
/// Always sorts last in the scheduling order.
pub const OFFLINE_UID: Uid = -1;

/// Unique identity of a session within the scheduler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub client_id: ClientId,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(client_id: ClientId, session_id: SessionId) -> Self {
        Self {
            client_id,
            session_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{client:{}, session:{}}}", self.client_id, self.session_id)
    }
}

/// Scheduling state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Submitted but the transcoder has not yet reported it started.
    NotStarted,
    /// Executing on the transcoder.
    Running,
    /// Suspended, either preempted or halted by resource loss.
    Paused,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not_started"),
            SessionState::Running => write!(f, "running"),
            SessionState::Paused => write!(f, "paused"),
        }
    }
}

/// Priority class of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPriority {
    /// Background work with no interactive caller; queued under [`OFFLINE_UID`].
    Offline,
    /// Work on behalf of a running application, queued under the caller's uid.
    Realtime,
}

impl Default for SessionPriority {
    fn default() -> Self {
        Self::Realtime
    }
}

/// The transcoding request payload. Opaque to the scheduler; handed to the
/// transcoder verbatim on start and resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodingRequest {
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub priority: SessionPriority,
}

/// Completion report delivered to the client with `on_transcoding_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodingResult {
    pub session_id: SessionId,
    pub actual_bitrate_bps: i32,
}

impl TranscodingResult {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            actual_bitrate_bps: 0,
        }
    }
}

/// Error codes reported by the transcoder for a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodingError {
    #[error("unknown error")]
    Unknown,
    #[error("malformed bitstream")]
    Malformed,
    #[error("unsupported format")]
    Unsupported,
    #[error("i/o error")]
    Io,
    #[error("insufficient codec resources")]
    InsufficientResources,
}

/// Transcoder command awaiting acknowledgment for a session.
///
/// At most one command per session is outstanding; the scheduler never issues
/// a second start or resume until the previous one is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingCommand {
    Start,
    Pause,
    Resume,
}

/// Per-session record owned by the registry.
pub struct Session {
    pub key: SessionKey,
    pub uid: Uid,
    pub state: SessionState,
    /// Last progress value forwarded to the client, in 0..=100.
    pub last_progress: i32,
    /// Number of sessions scheduled ahead of this one.
    pub await_count: u32,
    pub(crate) pending: Option<PendingCommand>,
    pub request: TranscodingRequest,
    /// Weak so the scheduler never keeps a client alive.
    pub callback: Weak<dyn ClientCallback>,
}

impl Session {
    pub fn new(
        key: SessionKey,
        uid: Uid,
        request: TranscodingRequest,
        callback: Weak<dyn ClientCallback>,
    ) -> Self {
        Self {
            key,
            uid,
            state: SessionState::NotStarted,
            last_progress: 0,
            await_count: 0,
            pending: None,
            request,
            callback,
        }
    }
}

/// Map of session key to session record.
///
/// Insertion fails on duplicate keys; removal of an unknown key is reported to
/// the caller, which treats it as a programming error.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionKey, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session. Returns `false` if the key is already present, in
    /// which case the registry is unchanged.
    pub fn insert(&mut self, session: Session) -> bool {
        match self.sessions.entry(session.key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn remove(&mut self, key: &SessionKey) -> Option<Session> {
        self.sessions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionKey, &Session)> {
        self.sessions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(source: &str) -> TranscodingRequest {
        TranscodingRequest {
            source_path: source.to_string(),
            destination_path: format!("{source}.out.mp4"),
            priority: SessionPriority::Realtime,
        }
    }

    fn make_session(client_id: ClientId, session_id: SessionId, uid: Uid) -> Session {
        Session::new(
            SessionKey::new(client_id, session_id),
            uid,
            make_request("/data/media/clip.mp4"),
            Weak::<crate::client::NoopClientCallback>::new(),
        )
    }

    #[test]
    fn test_session_key_display() {
        let key = SessionKey::new(1000, 3);
        assert_eq!(key.to_string(), "{client:1000, session:3}");
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::NotStarted.to_string(), "not_started");
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(SessionState::Paused.to_string(), "paused");
    }

    #[test]
    fn test_session_state_default() {
        assert_eq!(SessionState::default(), SessionState::NotStarted);
    }

    #[test]
    fn test_new_session_initial_fields() {
        let session = make_session(1000, 0, 5000);
        assert_eq!(session.state, SessionState::NotStarted);
        assert_eq!(session.last_progress, 0);
        assert_eq!(session.await_count, 0);
        assert_eq!(session.pending, None);
    }

    #[test]
    fn test_registry_insert_and_lookup() {
        let mut registry = SessionRegistry::new();
        let key = SessionKey::new(1000, 0);

        assert!(registry.insert(make_session(1000, 0, 5000)));
        assert!(registry.contains(&key));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key).unwrap().uid, 5000);
    }

    #[test]
    fn test_registry_duplicate_insert_fails() {
        let mut registry = SessionRegistry::new();

        assert!(registry.insert(make_session(1000, 0, 5000)));
        // Same key, different uid: the original record must survive.
        assert!(!registry.insert(make_session(1000, 0, 6000)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&SessionKey::new(1000, 0)).unwrap().uid, 5000);
    }

    #[test]
    fn test_registry_remove() {
        let mut registry = SessionRegistry::new();
        let key = SessionKey::new(1000, 0);

        registry.insert(make_session(1000, 0, 5000));
        assert!(registry.remove(&key).is_some());
        assert!(!registry.contains(&key));
        assert!(registry.remove(&key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_request_serde_round_trip() {
        let request = make_request("/data/media/clip.mp4");
        let json = serde_json::to_string(&request).expect("request should serialize");
        let back: TranscodingRequest =
            serde_json::from_str(&json).expect("request should deserialize");
        assert_eq!(request, back);
    }

    #[test]
    fn test_request_priority_defaults_to_realtime() {
        let json = r#"{"source_path":"/a.mp4","destination_path":"/b.mp4"}"#;
        let request: TranscodingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.priority, SessionPriority::Realtime);
    }

    #[test]
    fn test_transcoding_error_display() {
        assert_eq!(TranscodingError::Unknown.to_string(), "unknown error");
        assert_eq!(
            TranscodingError::InsufficientResources.to_string(),
            "insufficient codec resources"
        );
    }
}
