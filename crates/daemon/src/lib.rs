//! Transcoding Scheduler
//!
//! Long-lived controller that multiplexes transcoding sessions from multiple
//! client processes onto a single transcoder worker, ordered by application
//! foreground state, with codec resource-loss recovery.

pub mod client;
pub mod policy;
pub mod queues;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod simulated;
pub mod snapshot;
pub mod transcoder;

pub use client::{ClientCallback, NoopClientCallback};
pub use policy::{ProcessState, ResourcePolicyCallback, UidPolicyCallback, UidStateTracker};
pub use queues::PriorityQueues;
pub use scheduler::{SchedulerError, SessionScheduler};
pub use server::{create_router, run_server, AppState, LoggingClientCallback, ServerError};
pub use session::{
    ClientId, SessionId, SessionKey, SessionPriority, SessionRegistry, SessionState,
    TranscodingError, TranscodingRequest, TranscodingResult, Uid, OFFLINE_UID,
};
pub use simulated::SimulatedTranscoder;
pub use snapshot::{SchedulerSnapshot, SessionSnapshot};
pub use transcoder::{Transcoder, TranscoderCallback};

pub use transcoding_scheduler_config as config;
pub use transcoding_scheduler_config::Config;
