//! Foreground-state bookkeeping for monitored uids.
//!
//! The operating system reports per-uid process-state transitions; the
//! tracker derives the "top" set (every monitored uid at the most important
//! observed state) and pushes changes into the scheduler through
//! [`UidPolicyCallback`]. Resource availability flows through the analogous
//! [`ResourcePolicyCallback`].

use crate::session::{Uid, OFFLINE_UID};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use tracing::{debug, warn};

/// Receives foreground uid set changes, most important uid first.
pub trait UidPolicyCallback: Send + Sync {
    fn on_top_uids_changed(&self, uids: &[Uid]);
}

/// Receives codec resource recovery signals.
pub trait ResourcePolicyCallback: Send + Sync {
    fn on_resource_available(&self);
}

/// Importance of a uid's process state, most important first.
///
/// The derived ordering is the scheduling ordering: `Top` outranks
/// `Foreground`, and so on. `Unknown` never forms a top set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// The app the user is interacting with.
    Top,
    /// Visible but not focused.
    Foreground,
    /// Running a service with no UI.
    Service,
    /// In memory but not running.
    Cached,
    /// Not reported yet, or gone.
    Unknown,
}

/// Tracks process states for monitored uids and reports top-set changes.
pub struct UidStateTracker {
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    states: HashMap<Uid, ProcessState>,
    callback: Option<Weak<dyn UidPolicyCallback>>,
}

impl Default for UidStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UidStateTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                states: HashMap::new(),
                callback: None,
            }),
        }
    }

    pub fn set_callback(&self, callback: Weak<dyn UidPolicyCallback>) {
        self.lock().callback = Some(callback);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts monitoring a uid. Until a state change is reported the uid
    /// counts as `Unknown` and never reaches the top set.
    pub fn register_uid(&self, uid: Uid) {
        if uid == OFFLINE_UID {
            warn!("ignoring the offline uid");
            return;
        }
        let mut inner = self.lock();
        if inner.states.contains_key(&uid) {
            warn!(uid, "uid is already monitored");
            return;
        }
        inner.states.insert(uid, ProcessState::Unknown);
    }

    /// Stops monitoring a uid. A tracked top set shrinks accordingly but no
    /// callback fires; the scheduler re-ranks on the next report.
    pub fn unregister_uid(&self, uid: Uid) {
        let mut inner = self.lock();
        if inner.states.remove(&uid).is_none() {
            warn!(uid, "uid is not monitored");
        }
    }

    /// Whether the uid belongs to the current top set.
    pub fn is_uid_on_top(&self, uid: Uid) -> bool {
        let inner = self.lock();
        let Some(top_state) = top_state(&inner.states) else {
            return false;
        };
        inner.states.get(&uid) == Some(&top_state)
    }

    /// Current top set, sorted by uid for determinism.
    pub fn top_uids(&self) -> Vec<Uid> {
        let inner = self.lock();
        top_set(&inner.states)
    }

    /// Records a state transition and, if the top set changed, reports the
    /// new set to the callback. The callback is invoked after the internal
    /// lock is released.
    pub fn on_uid_state_changed(&self, uid: Uid, state: ProcessState) {
        let notify = {
            let mut inner = self.lock();
            let Some(previous) = inner.states.get(&uid).copied() else {
                debug!(uid, "ignoring state change for unmonitored uid");
                return;
            };
            if previous == state {
                return;
            }

            // The top set changes when the uid was part of it, or when the
            // new state ranks at least as high as the current top state.
            let current_top = top_state(&inner.states);
            let was_on_top = current_top.is_some() && inner.states.get(&uid).copied() == current_top;
            let outranks_top = state != ProcessState::Unknown
                && current_top.map_or(true, |top| state <= top);

            inner.states.insert(uid, state);
            debug!(uid, ?state, "uid state changed");

            if was_on_top || outranks_top {
                Some((top_set(&inner.states), inner.callback.clone()))
            } else {
                None
            }
        };

        if let Some((uids, callback)) = notify {
            if let Some(callback) = callback.and_then(|weak| weak.upgrade()) {
                callback.on_top_uids_changed(&uids);
            }
        }
    }
}

/// Most important state currently held by any monitored uid, if any state is
/// known at all.
fn top_state(states: &HashMap<Uid, ProcessState>) -> Option<ProcessState> {
    states
        .values()
        .copied()
        .filter(|state| *state != ProcessState::Unknown)
        .min()
}

fn top_set(states: &HashMap<Uid, ProcessState>) -> Vec<Uid> {
    let Some(top) = top_state(states) else {
        return Vec::new();
    };
    let mut uids: Vec<Uid> = states
        .iter()
        .filter(|(_, state)| **state == top)
        .map(|(uid, _)| *uid)
        .collect();
    uids.sort_unstable();
    uids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct RecordingPolicyCallback {
        reported: StdMutex<Vec<Vec<Uid>>>,
    }

    impl UidPolicyCallback for RecordingPolicyCallback {
        fn on_top_uids_changed(&self, uids: &[Uid]) {
            self.reported.lock().unwrap().push(uids.to_vec());
        }
    }

    fn make_tracker() -> (UidStateTracker, Arc<RecordingPolicyCallback>) {
        let tracker = UidStateTracker::new();
        let callback = Arc::new(RecordingPolicyCallback::default());
        let weak = {
            let strong: Arc<dyn UidPolicyCallback> = callback.clone();
            Arc::downgrade(&strong)
        };
        tracker.set_callback(weak);
        (tracker, callback)
    }

    #[test]
    fn test_unmonitored_uid_changes_are_ignored() {
        let (tracker, callback) = make_tracker();

        tracker.on_uid_state_changed(5000, ProcessState::Top);
        assert!(callback.reported.lock().unwrap().is_empty());
        assert!(!tracker.is_uid_on_top(5000));
    }

    #[test]
    fn test_registered_uid_starts_unknown() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        assert!(!tracker.is_uid_on_top(5000));
        assert!(tracker.top_uids().is_empty());
        assert!(callback.reported.lock().unwrap().is_empty());
    }

    #[test]
    fn test_offline_uid_is_never_monitored() {
        let (tracker, _callback) = make_tracker();

        tracker.register_uid(OFFLINE_UID);
        tracker.on_uid_state_changed(OFFLINE_UID, ProcessState::Top);
        assert!(tracker.top_uids().is_empty());
    }

    #[test]
    fn test_uid_reaching_top_reports() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.on_uid_state_changed(5000, ProcessState::Top);

        assert!(tracker.is_uid_on_top(5000));
        assert_eq!(*callback.reported.lock().unwrap(), vec![vec![5000]]);
    }

    #[test]
    fn test_more_important_uid_takes_over() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.register_uid(5001);
        tracker.on_uid_state_changed(5000, ProcessState::Foreground);
        tracker.on_uid_state_changed(5001, ProcessState::Top);

        assert!(!tracker.is_uid_on_top(5000));
        assert!(tracker.is_uid_on_top(5001));
        assert_eq!(
            *callback.reported.lock().unwrap(),
            vec![vec![5000], vec![5001]]
        );
    }

    #[test]
    fn test_equal_importance_forms_a_set() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5001);
        tracker.register_uid(5000);
        tracker.on_uid_state_changed(5001, ProcessState::Top);
        tracker.on_uid_state_changed(5000, ProcessState::Top);

        assert_eq!(tracker.top_uids(), vec![5000, 5001]);
        let reported = callback.reported.lock().unwrap();
        assert_eq!(reported.last(), Some(&vec![5000, 5001]));
    }

    #[test]
    fn test_top_uid_backgrounding_reports_new_top() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.register_uid(5001);
        tracker.on_uid_state_changed(5000, ProcessState::Top);
        tracker.on_uid_state_changed(5001, ProcessState::Foreground);
        callback.reported.lock().unwrap().clear();

        // The top uid falls to cached; the foreground uid becomes top.
        tracker.on_uid_state_changed(5000, ProcessState::Cached);
        assert_eq!(tracker.top_uids(), vec![5001]);
        assert_eq!(*callback.reported.lock().unwrap(), vec![vec![5001]]);
    }

    #[test]
    fn test_background_shuffle_does_not_report() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.register_uid(5001);
        tracker.on_uid_state_changed(5000, ProcessState::Top);
        callback.reported.lock().unwrap().clear();

        // A background uid moving between background states is irrelevant.
        tracker.on_uid_state_changed(5001, ProcessState::Cached);
        tracker.on_uid_state_changed(5001, ProcessState::Service);
        assert!(callback.reported.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_state_is_not_reported() {
        let (tracker, callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.on_uid_state_changed(5000, ProcessState::Top);
        tracker.on_uid_state_changed(5000, ProcessState::Top);
        assert_eq!(callback.reported.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister_removes_from_top_set() {
        let (tracker, _callback) = make_tracker();

        tracker.register_uid(5000);
        tracker.on_uid_state_changed(5000, ProcessState::Top);
        tracker.unregister_uid(5000);

        assert!(tracker.top_uids().is_empty());
        assert!(!tracker.is_uid_on_top(5000));
    }

    #[test]
    fn test_process_state_ordering() {
        assert!(ProcessState::Top < ProcessState::Foreground);
        assert!(ProcessState::Foreground < ProcessState::Service);
        assert!(ProcessState::Service < ProcessState::Cached);
        assert!(ProcessState::Cached < ProcessState::Unknown);
    }
}
