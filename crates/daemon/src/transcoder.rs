//! Capability traits bounding the transcoder.
//!
//! The scheduler drives a single underlying transcoder worker through
//! [`Transcoder`] and receives its lifecycle reports through
//! [`TranscoderCallback`]. The worker executes at most one session at a time;
//! the scheduler guarantees it never overlaps `start` on two sessions and
//! never issues `resume` without a prior `start` or `pause`.

use crate::session::{ClientId, SessionId, TranscodingError, TranscodingRequest};

/// Commands issued to the transcoder worker.
///
/// Commands are asynchronous: they must enqueue and return without blocking
/// and without calling back into the scheduler, which may be holding its lock.
/// Completion is reported through [`TranscoderCallback`].
pub trait Transcoder: Send + Sync {
    /// Begin a fresh session.
    fn start(&self, client_id: ClientId, session_id: SessionId, request: &TranscodingRequest);
    /// Suspend the running session, keeping its progress.
    fn pause(&self, client_id: ClientId, session_id: SessionId);
    /// Continue a previously paused session.
    fn resume(&self, client_id: ClientId, session_id: SessionId, request: &TranscodingRequest);
    /// Abort a session and discard its progress.
    fn stop(&self, client_id: ClientId, session_id: SessionId);
}

/// Lifecycle reports from the transcoder worker back into the scheduler.
pub trait TranscoderCallback: Send + Sync {
    fn on_started(&self, client_id: ClientId, session_id: SessionId);
    fn on_paused(&self, client_id: ClientId, session_id: SessionId);
    fn on_resumed(&self, client_id: ClientId, session_id: SessionId);
    fn on_finish(&self, client_id: ClientId, session_id: SessionId);
    fn on_error(&self, client_id: ClientId, session_id: SessionId, error: TranscodingError);
    /// Progress in 0..=100 for the running session.
    fn on_progress_update(&self, client_id: ClientId, session_id: SessionId, progress: i32);
    /// Codec resources were reclaimed; no session can run until
    /// resource-available is signalled.
    fn on_resource_lost(&self);
}
