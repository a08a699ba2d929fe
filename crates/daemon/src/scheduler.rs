//! The scheduling core.
//!
//! All entry points funnel through a single mutex guarding the session
//! registry, the priority queues, the current-session pointer and the
//! resource-lost latch. `update_current_session` is the only place that
//! drives the transcoder: after any entry point returns, the current session
//! is exactly the top session of the priority structure, at most one session
//! is running, and no start or resume has been issued while codec resources
//! are lost.
//!
//! Client notifications are collected while the lock is held and delivered
//! after it is released, so a client callback may safely re-enter the
//! scheduler.

use crate::client::{deliver_all, ClientCallback, ClientEvent, Notification};
use crate::policy::{ResourcePolicyCallback, UidPolicyCallback};
use crate::queues::PriorityQueues;
use crate::session::{
    ClientId, PendingCommand, Session, SessionId, SessionKey, SessionPriority, SessionRegistry,
    SessionState, TranscodingError, TranscodingRequest, TranscodingResult, Uid, OFFLINE_UID,
};
use crate::snapshot::{SchedulerSnapshot, SessionSnapshot};
use crate::transcoder::{Transcoder, TranscoderCallback};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported synchronously to callers of the client-facing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("session {0} already exists")]
    DuplicateSession(SessionKey),
    #[error("session {0} doesn't exist")]
    UnknownSession(SessionKey),
}

struct Inner {
    registry: SessionRegistry,
    queues: PriorityQueues,
    /// The session selected to occupy the transcoder; equals the top session
    /// after every operation.
    current: Option<SessionKey>,
    /// While set, no start or resume is issued.
    resource_lost: bool,
    /// Most recent foreground uid set, in the order it was reported.
    top_uids: Vec<Uid>,
}

/// Multiplexes transcoding sessions from many clients onto one transcoder
/// worker, strictly ordered by application foreground state.
pub struct SessionScheduler {
    transcoder: Arc<dyn Transcoder>,
    inner: Mutex<Inner>,
}

impl SessionScheduler {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            inner: Mutex::new(Inner {
                registry: SessionRegistry::new(),
                queues: PriorityQueues::new(),
                current: None,
                resource_lost: false,
                top_uids: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submits a new session on behalf of `uid`.
    ///
    /// Offline-priority requests are queued under the offline uid regardless
    /// of the caller. The session starts immediately if it becomes the top
    /// session (the client observes `on_transcoding_started` once the
    /// transcoder acknowledges); otherwise the client is told how many
    /// sessions are ahead of it via `on_await_sessions_changed`.
    pub fn submit(
        &self,
        client_id: ClientId,
        session_id: SessionId,
        uid: Uid,
        request: TranscodingRequest,
        callback: Weak<dyn ClientCallback>,
    ) -> Result<(), SchedulerError> {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();

        let mut inner = self.lock();
        if inner.registry.contains(&key) {
            warn!(%key, "duplicate submit");
            return Err(SchedulerError::DuplicateSession(key));
        }

        let uid = if request.priority == SessionPriority::Offline {
            OFFLINE_UID
        } else {
            uid
        };
        debug!(%key, uid, "submitting session");

        let is_top = inner.top_uids.contains(&uid);
        inner.registry.insert(Session::new(key, uid, request, callback));
        inner.queues.enqueue(uid, key, is_top);

        self.update_current_session(&mut inner);
        Self::refresh_await_counts(&mut inner, &mut notes);

        drop(inner);
        deliver_all(notes);
        Ok(())
    }

    /// Cancels a session. Synchronous: once this returns Ok, no further
    /// events for the session are delivered to its client.
    pub fn cancel(&self, client_id: ClientId, session_id: SessionId) -> Result<(), SchedulerError> {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();

        let mut inner = self.lock();
        let Some(session) = inner.registry.get(&key) else {
            warn!(%key, "cancel for unknown session");
            return Err(SchedulerError::UnknownSession(key));
        };
        debug!(%key, "cancelling session");

        // The transcoder only holds context for the current session; take it
        // off the worker unless it was never handed over.
        let occupies_transcoder =
            session.state != SessionState::NotStarted || session.pending.is_some();
        if inner.current == Some(key) && occupies_transcoder {
            self.transcoder.stop(key.client_id, key.session_id);
        }

        Self::remove_session(&mut inner, &key);
        self.update_current_session(&mut inner);
        Self::refresh_await_counts(&mut inner, &mut notes);

        drop(inner);
        deliver_all(notes);
        Ok(())
    }

    /// Returns a copy of the stored request for a session.
    pub fn get_session(
        &self,
        client_id: ClientId,
        session_id: SessionId,
    ) -> Result<TranscodingRequest, SchedulerError> {
        let key = SessionKey::new(client_id, session_id);
        let inner = self.lock();
        inner
            .registry
            .get(&key)
            .map(|session| session.request.clone())
            .ok_or(SchedulerError::UnknownSession(key))
    }

    /// The uid-state source reports a new foreground uid set, most important
    /// first. An empty set is ignored.
    pub fn on_top_uids_changed(&self, uids: &[Uid]) {
        if uids.is_empty() {
            warn!("ignoring empty top uid set");
            return;
        }

        let mut notes = Vec::new();
        let mut inner = self.lock();
        debug!(?uids, "top uids changed");

        let mut latched = Vec::with_capacity(uids.len());
        for &uid in uids {
            if !latched.contains(&uid) {
                latched.push(uid);
            }
        }
        inner.top_uids = latched;

        // Keep the current session's uid ahead of the promoted set unless it
        // is itself in the set, so a pure re-sort never preempts it. The
        // offline anchor stays put either way.
        let keep_front = inner
            .current
            .and_then(|key| inner.registry.get(&key))
            .map(|session| session.uid)
            .filter(|uid| *uid != OFFLINE_UID && !inner.top_uids.contains(uid));
        let top = inner.top_uids.clone();
        inner.queues.move_uids_to_top(&top, keep_front);

        self.update_current_session(&mut inner);
        Self::refresh_await_counts(&mut inner, &mut notes);

        drop(inner);
        deliver_all(notes);
    }

    /// Codec resources are back; clear the latch and drive the top session.
    pub fn on_resource_available(&self) {
        let mut inner = self.lock();
        debug!("resource available");
        inner.resource_lost = false;
        self.update_current_session(&mut inner);
    }

    /// Codec resources were reclaimed. The current session, if it occupies
    /// the worker, is paused in place; nothing starts or resumes until
    /// [`Self::on_resource_available`].
    pub fn on_resource_lost(&self) {
        let mut notes = Vec::new();
        let mut inner = self.lock();
        warn!("codec resources lost");

        if let Some(key) = inner.current {
            if let Some(session) = inner.registry.get_mut(&key) {
                match (session.state, session.pending) {
                    (SessionState::Running, _) => {
                        self.transcoder.pause(key.client_id, key.session_id);
                        session.state = SessionState::Paused;
                        session.pending = None;
                        notes.push(Notification {
                            callback: session.callback.clone(),
                            session_id: key.session_id,
                            event: ClientEvent::Paused,
                        });
                    }
                    (SessionState::NotStarted, Some(PendingCommand::Start)) => {
                        // Start never acknowledged; discard so it restarts
                        // cleanly after recovery.
                        self.transcoder.stop(key.client_id, key.session_id);
                        session.pending = None;
                    }
                    (SessionState::Paused, Some(PendingCommand::Resume)) => {
                        self.transcoder.pause(key.client_id, key.session_id);
                        session.pending = None;
                    }
                    _ => {}
                }
            }
        }
        inner.resource_lost = true;

        drop(inner);
        deliver_all(notes);
    }

    /// Transcoder acknowledged a start.
    pub fn on_started(&self, client_id: ClientId, session_id: SessionId) {
        self.handle_run_ack(
            SessionKey::new(client_id, session_id),
            PendingCommand::Start,
            ClientEvent::Started,
        );
    }

    /// Transcoder acknowledged a resume.
    pub fn on_resumed(&self, client_id: ClientId, session_id: SessionId) {
        self.handle_run_ack(
            SessionKey::new(client_id, session_id),
            PendingCommand::Resume,
            ClientEvent::Resumed,
        );
    }

    /// An acknowledgment is honored only while the matching command is still
    /// outstanding for the current session. Superseding a start or resume
    /// (stop or pause issued before the transcoder confirmed it) clears the
    /// pending marker, so the confirmation arriving behind the superseding
    /// command is stale and must not mark the session running.
    fn handle_run_ack(&self, key: SessionKey, expected: PendingCommand, event: ClientEvent) {
        let mut notes = Vec::new();
        let mut inner = self.lock();

        if inner.current != Some(key) {
            debug!(%key, "ignoring run ack for non-current session");
        } else if let Some(session) = inner.registry.get_mut(&key) {
            if session.pending == Some(expected) {
                session.state = SessionState::Running;
                session.pending = None;
                notes.push(Notification {
                    callback: session.callback.clone(),
                    session_id: key.session_id,
                    event,
                });
            } else {
                debug!(%key, "ignoring stale run ack");
            }
        }

        drop(inner);
        deliver_all(notes);
    }

    /// Transcoder acknowledged a pause, or paused the running session on its
    /// own. Exactly one `on_transcoding_paused` reaches the client per pause
    /// transition.
    pub fn on_paused(&self, client_id: ClientId, session_id: SessionId) {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();
        let mut inner = self.lock();

        let current = inner.current;
        let mut reevaluate = false;
        match inner.registry.get_mut(&key) {
            None => debug!(%key, "ignoring pause for untracked session"),
            Some(session) => {
                if session.state == SessionState::Running && current == Some(key) {
                    session.state = SessionState::Paused;
                    session.pending = None;
                    notes.push(Notification {
                        callback: session.callback.clone(),
                        session_id: key.session_id,
                        event: ClientEvent::Paused,
                    });
                } else if session.pending == Some(PendingCommand::Pause) {
                    session.pending = None;
                    notes.push(Notification {
                        callback: session.callback.clone(),
                        session_id: key.session_id,
                        event: ClientEvent::Paused,
                    });
                    // The preemptor may be gone by the time the pause is
                    // confirmed, leaving this session top again; without a
                    // re-evaluation it would never be resumed.
                    reevaluate = current == Some(key);
                } else {
                    debug!(%key, "ignoring spurious pause");
                }
            }
        }
        if reevaluate {
            self.update_current_session(&mut inner);
        }

        drop(inner);
        deliver_all(notes);
    }

    /// Transcoder finished a session. Idempotent for untracked keys.
    pub fn on_finish(&self, client_id: ClientId, session_id: SessionId) {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();
        let mut inner = self.lock();

        if let Some(session) = inner.registry.get(&key) {
            debug!(%key, "session finished");
            notes.push(Notification {
                callback: session.callback.clone(),
                session_id: key.session_id,
                event: ClientEvent::Finished(TranscodingResult::new(key.session_id)),
            });
            Self::remove_session(&mut inner, &key);
            self.update_current_session(&mut inner);
            Self::refresh_await_counts(&mut inner, &mut notes);
        } else {
            debug!(%key, "ignoring finish for untracked session");
        }

        drop(inner);
        deliver_all(notes);
    }

    /// Transcoder failed a session. Idempotent for untracked keys.
    pub fn on_error(&self, client_id: ClientId, session_id: SessionId, error: TranscodingError) {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();
        let mut inner = self.lock();

        if let Some(session) = inner.registry.get(&key) {
            debug!(%key, %error, "session failed");
            notes.push(Notification {
                callback: session.callback.clone(),
                session_id: key.session_id,
                event: ClientEvent::Failed(error),
            });
            Self::remove_session(&mut inner, &key);
            self.update_current_session(&mut inner);
            Self::refresh_await_counts(&mut inner, &mut notes);
        } else {
            debug!(%key, "ignoring error for untracked session");
        }

        drop(inner);
        deliver_all(notes);
    }

    /// Progress report for a session. Values are clamped to 0..=100 and must
    /// be non-decreasing; anything out of order is dropped.
    pub fn on_progress_update(&self, client_id: ClientId, session_id: SessionId, progress: i32) {
        let key = SessionKey::new(client_id, session_id);
        let mut notes = Vec::new();
        let mut inner = self.lock();

        match inner.registry.get_mut(&key) {
            None => debug!(%key, "ignoring progress for untracked session"),
            Some(session) => {
                let clamped = progress.clamp(0, 100);
                if clamped < session.last_progress {
                    debug!(%key, progress, "dropping out-of-order progress");
                } else {
                    session.last_progress = clamped;
                    notes.push(Notification {
                        callback: session.callback.clone(),
                        session_id: key.session_id,
                        event: ClientEvent::Progress(clamped),
                    });
                }
            }
        }

        drop(inner);
        deliver_all(notes);
    }

    /// Read-only view of the whole scheduler for introspection.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let inner = self.lock();
        let sessions = inner
            .queues
            .keys_in_order()
            .into_iter()
            .filter_map(|key| {
                inner.registry.get(&key).map(|session| SessionSnapshot {
                    client_id: key.client_id,
                    session_id: key.session_id,
                    uid: session.uid,
                    state: session.state,
                    last_progress: session.last_progress,
                    await_count: session.await_count,
                    priority: session.request.priority,
                    source_path: session.request.source_path.clone(),
                    destination_path: session.request.destination_path.clone(),
                })
            })
            .collect();
        SchedulerSnapshot {
            sessions,
            uid_order: inner.queues.uid_order().to_vec(),
            current: inner.current,
            resource_lost: inner.resource_lost,
            top_uids: inner.top_uids.clone(),
        }
    }

    /// The only place the transcoder is driven. Afterwards the current
    /// session is the top session and, unless resources are lost or an
    /// acknowledgment is outstanding, it has been told to run.
    fn update_current_session(&self, inner: &mut Inner) {
        let next = inner.queues.top_session_key();
        let current = inner.current;
        debug!(
            top = %fmt_key(next),
            current = %fmt_key(current),
            "updating current session"
        );

        if let Some(next_key) = next {
            let next_running = inner
                .registry
                .get(&next_key)
                .map_or(false, |session| session.state == SessionState::Running);

            if current != Some(next_key) || !next_running {
                // Take the transcoder off the outgoing session first.
                if let Some(cur_key) = current {
                    if cur_key != next_key {
                        if let Some(cur) = inner.registry.get_mut(&cur_key) {
                            match (cur.state, cur.pending) {
                                (SessionState::Running, _) => {
                                    self.transcoder.pause(cur_key.client_id, cur_key.session_id);
                                    cur.state = SessionState::Paused;
                                    cur.pending = Some(PendingCommand::Pause);
                                }
                                (SessionState::NotStarted, Some(PendingCommand::Start)) => {
                                    // Start never acknowledged; discard and
                                    // restart from scratch when it tops again.
                                    self.transcoder.stop(cur_key.client_id, cur_key.session_id);
                                    cur.pending = None;
                                }
                                (SessionState::Paused, Some(PendingCommand::Resume)) => {
                                    self.transcoder.pause(cur_key.client_id, cur_key.session_id);
                                    cur.pending = None;
                                }
                                _ => {}
                            }
                        }
                    }
                }

                if !inner.resource_lost {
                    if let Some(session) = inner.registry.get_mut(&next_key) {
                        if session.pending.is_none() {
                            match session.state {
                                SessionState::NotStarted => {
                                    self.transcoder.start(
                                        next_key.client_id,
                                        next_key.session_id,
                                        &session.request,
                                    );
                                    session.pending = Some(PendingCommand::Start);
                                }
                                SessionState::Paused => {
                                    self.transcoder.resume(
                                        next_key.client_id,
                                        next_key.session_id,
                                        &session.request,
                                    );
                                    session.pending = Some(PendingCommand::Resume);
                                }
                                SessionState::Running => {}
                            }
                        }
                    }
                }
            }
        }

        inner.current = next;
    }

    /// Drops the session from the queue and the registry. When its uid stops
    /// being tracked, the latched foreground set is re-applied so previously
    /// foregrounded uids regain their rank.
    fn remove_session(inner: &mut Inner, key: &SessionKey) {
        let Some(session) = inner.registry.get(key) else {
            warn!(%key, "removing unknown session");
            return;
        };
        let uid = session.uid;

        if inner.queues.remove(uid, key) {
            let top = inner.top_uids.clone();
            inner.queues.move_uids_to_top(&top, None);
        }
        if inner.current == Some(*key) {
            inner.current = None;
        }
        inner.registry.remove(key);
    }

    /// Recomputes how many sessions are ahead of each queued session and
    /// notifies the ones whose count changed. The current session is skipped;
    /// it learns about its promotion through started/resumed instead.
    fn refresh_await_counts(inner: &mut Inner, notes: &mut Vec<Notification>) {
        let keys = inner.queues.keys_in_order();
        for (position, key) in keys.into_iter().enumerate() {
            let position = position as u32;
            let is_current = inner.current == Some(key);
            if let Some(session) = inner.registry.get_mut(&key) {
                if session.await_count != position {
                    let old_count = session.await_count;
                    session.await_count = position;
                    if !is_current {
                        notes.push(Notification {
                            callback: session.callback.clone(),
                            session_id: key.session_id,
                            event: ClientEvent::AwaitChanged {
                                old_count,
                                new_count: position,
                            },
                        });
                    }
                }
            }
        }
    }

    /// Checks the structural invariants after an operation. Test builds only.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let inner = self.lock();

        let running: Vec<SessionKey> = inner
            .registry
            .iter()
            .filter(|(_, session)| session.state == SessionState::Running)
            .map(|(key, _)| *key)
            .collect();
        assert!(running.len() <= 1, "more than one running session");
        if let Some(key) = running.first() {
            assert_eq!(
                Some(*key),
                inner.queues.top_session_key(),
                "running session is not the top session"
            );
        }

        let mut queued = inner.queues.keys_in_order();
        let mut registered: Vec<SessionKey> = inner.registry.iter().map(|(key, _)| *key).collect();
        queued.sort_unstable();
        registered.sort_unstable();
        assert_eq!(queued, registered, "registry and queues disagree");

        assert_eq!(
            inner.queues.uid_order().last(),
            Some(&OFFLINE_UID),
            "offline anchor is not last"
        );

        for (key, session) in inner.registry.iter() {
            assert!(
                (0..=100).contains(&session.last_progress),
                "progress out of range for {key}"
            );
        }

        assert_eq!(
            inner.current,
            inner.queues.top_session_key(),
            "current session is not the top session"
        );
    }
}

impl TranscoderCallback for SessionScheduler {
    fn on_started(&self, client_id: ClientId, session_id: SessionId) {
        SessionScheduler::on_started(self, client_id, session_id);
    }
    fn on_paused(&self, client_id: ClientId, session_id: SessionId) {
        SessionScheduler::on_paused(self, client_id, session_id);
    }
    fn on_resumed(&self, client_id: ClientId, session_id: SessionId) {
        SessionScheduler::on_resumed(self, client_id, session_id);
    }
    fn on_finish(&self, client_id: ClientId, session_id: SessionId) {
        SessionScheduler::on_finish(self, client_id, session_id);
    }
    fn on_error(&self, client_id: ClientId, session_id: SessionId, error: TranscodingError) {
        SessionScheduler::on_error(self, client_id, session_id, error);
    }
    fn on_progress_update(&self, client_id: ClientId, session_id: SessionId, progress: i32) {
        SessionScheduler::on_progress_update(self, client_id, session_id, progress);
    }
    fn on_resource_lost(&self) {
        SessionScheduler::on_resource_lost(self);
    }
}

impl UidPolicyCallback for SessionScheduler {
    fn on_top_uids_changed(&self, uids: &[Uid]) {
        SessionScheduler::on_top_uids_changed(self, uids);
    }
}

impl ResourcePolicyCallback for SessionScheduler {
    fn on_resource_available(&self) {
        SessionScheduler::on_resource_available(self);
    }
}

fn fmt_key(key: Option<SessionKey>) -> String {
    key.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string())
}
