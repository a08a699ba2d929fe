//! Outbound client event sink.
//!
//! Clients register an event sink at submission time. The scheduler holds it
//! weakly and upgrades only to deliver, so a scheduler never keeps a client
//! process alive. Deliveries to dead clients are dropped without affecting
//! scheduling.

use crate::session::{SessionId, TranscodingError, TranscodingResult};
use std::sync::Weak;
use tracing::debug;

/// Event sink implemented by clients to observe their sessions.
///
/// Events for one session arrive in transition order: started, then any
/// number of paused/resumed pairs and progress updates, then finished or
/// failed. A cancelled session produces no further events.
pub trait ClientCallback: Send + Sync {
    fn on_transcoding_started(&self, session_id: SessionId);
    fn on_transcoding_paused(&self, session_id: SessionId);
    fn on_transcoding_resumed(&self, session_id: SessionId);
    fn on_transcoding_finished(&self, session_id: SessionId, result: TranscodingResult);
    fn on_transcoding_failed(&self, session_id: SessionId, error: TranscodingError);
    fn on_progress_update(&self, session_id: SessionId, progress: i32);

    /// Informational: the number of sessions scheduled ahead of this one
    /// changed. Default is to ignore it.
    fn on_await_sessions_changed(&self, session_id: SessionId, old_count: u32, new_count: u32) {
        let _ = (session_id, old_count, new_count);
    }
}

/// A callback sink that discards every event.
#[derive(Debug, Default)]
pub struct NoopClientCallback;

impl ClientCallback for NoopClientCallback {
    fn on_transcoding_started(&self, _session_id: SessionId) {}
    fn on_transcoding_paused(&self, _session_id: SessionId) {}
    fn on_transcoding_resumed(&self, _session_id: SessionId) {}
    fn on_transcoding_finished(&self, _session_id: SessionId, _result: TranscodingResult) {}
    fn on_transcoding_failed(&self, _session_id: SessionId, _error: TranscodingError) {}
    fn on_progress_update(&self, _session_id: SessionId, _progress: i32) {}
}

/// One client-visible event, queued while the scheduler lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientEvent {
    Started,
    Paused,
    Resumed,
    Finished(TranscodingResult),
    Failed(TranscodingError),
    Progress(i32),
    AwaitChanged { old_count: u32, new_count: u32 },
}

/// A pending delivery: the target sink plus the event.
pub(crate) struct Notification {
    pub callback: Weak<dyn ClientCallback>,
    pub session_id: SessionId,
    pub event: ClientEvent,
}

/// Delivers a batch of notifications collected under the scheduler lock.
///
/// Must be called after the lock is released: sinks may call back into the
/// scheduler. Upgrades that fail are dropped.
pub(crate) fn deliver_all(notifications: Vec<Notification>) {
    for note in notifications {
        let Some(callback) = note.callback.upgrade() else {
            debug!(
                session_id = note.session_id,
                "dropping delivery for dead client"
            );
            continue;
        };
        match note.event {
            ClientEvent::Started => callback.on_transcoding_started(note.session_id),
            ClientEvent::Paused => callback.on_transcoding_paused(note.session_id),
            ClientEvent::Resumed => callback.on_transcoding_resumed(note.session_id),
            ClientEvent::Finished(result) => {
                callback.on_transcoding_finished(note.session_id, result)
            }
            ClientEvent::Failed(error) => callback.on_transcoding_failed(note.session_id, error),
            ClientEvent::Progress(progress) => {
                callback.on_progress_update(note.session_id, progress)
            }
            ClientEvent::AwaitChanged {
                old_count,
                new_count,
            } => callback.on_await_sessions_changed(note.session_id, old_count, new_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingCallback {
        seen: Mutex<Vec<String>>,
    }

    impl ClientCallback for RecordingCallback {
        fn on_transcoding_started(&self, session_id: SessionId) {
            self.seen.lock().unwrap().push(format!("started:{session_id}"));
        }
        fn on_transcoding_paused(&self, session_id: SessionId) {
            self.seen.lock().unwrap().push(format!("paused:{session_id}"));
        }
        fn on_transcoding_resumed(&self, session_id: SessionId) {
            self.seen.lock().unwrap().push(format!("resumed:{session_id}"));
        }
        fn on_transcoding_finished(&self, session_id: SessionId, _result: TranscodingResult) {
            self.seen.lock().unwrap().push(format!("finished:{session_id}"));
        }
        fn on_transcoding_failed(&self, session_id: SessionId, error: TranscodingError) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("failed:{session_id}:{error}"));
        }
        fn on_progress_update(&self, session_id: SessionId, progress: i32) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("progress:{session_id}:{progress}"));
        }
    }

    #[test]
    fn test_deliver_all_in_order() {
        let callback = Arc::new(RecordingCallback::default());
        let weak: Weak<dyn ClientCallback> = {
            let arc: Arc<dyn ClientCallback> = callback.clone();
            Arc::downgrade(&arc)
        };

        deliver_all(vec![
            Notification {
                callback: weak.clone(),
                session_id: 1,
                event: ClientEvent::Started,
            },
            Notification {
                callback: weak.clone(),
                session_id: 1,
                event: ClientEvent::Progress(50),
            },
            Notification {
                callback: weak,
                session_id: 1,
                event: ClientEvent::Finished(TranscodingResult::new(1)),
            },
        ]);

        let seen = callback.seen.lock().unwrap();
        assert_eq!(*seen, vec!["started:1", "progress:1:50", "finished:1"]);
    }

    #[test]
    fn test_deliver_to_dead_client_is_dropped() {
        let weak: Weak<dyn ClientCallback> = {
            let arc: Arc<dyn ClientCallback> = Arc::new(RecordingCallback::default());
            Arc::downgrade(&arc)
            // arc dropped here; upgrade will fail
        };

        // Must not panic.
        deliver_all(vec![Notification {
            callback: weak,
            session_id: 7,
            event: ClientEvent::Started,
        }]);
    }
}
