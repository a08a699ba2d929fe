//! Virtual-time transcoder for driving the scheduler without real codecs.
//!
//! Commands queue onto a worker task that holds at most one running session.
//! Start and resume are honored only while idle, pause and stop only for the
//! running session; anything else is discarded. Each accepted command is
//! acknowledged through the registered callback, and a session finishes once
//! its simulated processing time has elapsed, with pauses excluded.

use crate::session::{ClientId, SessionId, SessionKey, TranscodingRequest};
use crate::transcoder::{Transcoder, TranscoderCallback};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Command {
    Start(SessionKey),
    Pause(SessionKey),
    Resume(SessionKey),
    Stop(SessionKey),
}

/// A transcoder that pretends to work for a configured duration per session.
pub struct SimulatedTranscoder {
    commands: mpsc::UnboundedSender<Command>,
    callback: Mutex<Option<Weak<dyn TranscoderCallback>>>,
}

impl SimulatedTranscoder {
    /// Spawns the worker task onto the current tokio runtime. Each session
    /// takes `session_duration` of (simulated) processing.
    pub fn new(session_duration: Duration) -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let transcoder = Arc::new(Self {
            commands,
            callback: Mutex::new(None),
        });
        tokio::spawn(run_worker(transcoder.clone(), receiver, session_duration));
        transcoder
    }

    /// Registers the scheduler as the receiver of lifecycle reports. Held
    /// weakly to avoid a reference cycle with the scheduler.
    pub fn set_callback(&self, callback: Weak<dyn TranscoderCallback>) {
        let mut slot = self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(callback);
    }

    fn callback(&self) -> Option<Arc<dyn TranscoderCallback>> {
        self.callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .and_then(|weak| weak.upgrade())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("simulated transcoder worker is gone");
        }
    }
}

impl Transcoder for SimulatedTranscoder {
    fn start(&self, client_id: ClientId, session_id: SessionId, _request: &TranscodingRequest) {
        self.send(Command::Start(SessionKey::new(client_id, session_id)));
    }
    fn pause(&self, client_id: ClientId, session_id: SessionId) {
        self.send(Command::Pause(SessionKey::new(client_id, session_id)));
    }
    fn resume(&self, client_id: ClientId, session_id: SessionId, _request: &TranscodingRequest) {
        self.send(Command::Resume(SessionKey::new(client_id, session_id)));
    }
    fn stop(&self, client_id: ClientId, session_id: SessionId) {
        self.send(Command::Stop(SessionKey::new(client_id, session_id)));
    }
}

enum WorkerEvent {
    Command(Command),
    Finished(SessionKey),
    Closed,
}

async fn run_worker(
    transcoder: Arc<SimulatedTranscoder>,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    session_duration: Duration,
) {
    // Processing time left per known session; entries survive pauses.
    let mut remaining: HashMap<SessionKey, Duration> = HashMap::new();
    let mut running: Option<(SessionKey, Instant)> = None;

    loop {
        let event = match running {
            Some((key, deadline)) => {
                tokio::select! {
                    command = receiver.recv() => match command {
                        Some(command) => WorkerEvent::Command(command),
                        None => WorkerEvent::Closed,
                    },
                    _ = tokio::time::sleep_until(deadline) => WorkerEvent::Finished(key),
                }
            }
            None => match receiver.recv().await {
                Some(command) => WorkerEvent::Command(command),
                None => WorkerEvent::Closed,
            },
        };

        match event {
            WorkerEvent::Closed => break,
            WorkerEvent::Finished(key) => {
                debug!(%key, "session finished");
                running = None;
                remaining.remove(&key);
                if let Some(callback) = transcoder.callback() {
                    callback.on_finish(key.client_id, key.session_id);
                }
            }
            WorkerEvent::Command(command) => {
                handle_command(&transcoder, command, session_duration, &mut remaining, &mut running);
            }
        }
    }
}

fn handle_command(
    transcoder: &SimulatedTranscoder,
    command: Command,
    session_duration: Duration,
    remaining: &mut HashMap<SessionKey, Duration>,
    running: &mut Option<(SessionKey, Instant)>,
) {
    match command {
        Command::Start(key) if running.is_none() => {
            debug!(%key, "starting session");
            remaining.insert(key, session_duration);
            *running = Some((key, Instant::now() + session_duration));
            if let Some(callback) = transcoder.callback() {
                callback.on_started(key.client_id, key.session_id);
            }
        }
        Command::Resume(key) if running.is_none() => {
            debug!(%key, "resuming session");
            let left = remaining.get(&key).copied().unwrap_or(session_duration);
            *running = Some((key, Instant::now() + left));
            if let Some(callback) = transcoder.callback() {
                callback.on_resumed(key.client_id, key.session_id);
            }
        }
        Command::Pause(key) if running.map(|(k, _)| k) == Some(key) => {
            debug!(%key, "pausing session");
            if let Some((_, deadline)) = running.take() {
                remaining.insert(key, deadline.saturating_duration_since(Instant::now()));
            }
            if let Some(callback) = transcoder.callback() {
                callback.on_paused(key.client_id, key.session_id);
            }
        }
        Command::Stop(key) => {
            debug!(%key, "stopping session");
            if running.map(|(k, _)| k) == Some(key) {
                *running = None;
            }
            remaining.remove(&key);
        }
        other => {
            warn!("discarding bad command: {other:?}");
        }
    }
}
