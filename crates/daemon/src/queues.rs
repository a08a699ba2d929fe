//! Per-uid session queues and the uid scheduling order.
//!
//! Sessions queue FIFO under their uid. Uids are kept in a priority order
//! where the head is the most-recently-foregrounded uid and the tail is the
//! permanent offline anchor: a sentinel uid whose queue always exists, which
//! is never promoted, and behind which nothing ever sorts. A non-offline uid
//! is tracked only while its queue is non-empty.

use crate::session::{SessionKey, Uid, OFFLINE_UID};
use std::collections::{HashMap, VecDeque};
use tracing::error;

/// The two parallel indexes picking the next session to run: uid -> FIFO of
/// session keys, plus the ordered uid list ending in the offline anchor.
pub struct PriorityQueues {
    queues: HashMap<Uid, VecDeque<SessionKey>>,
    uid_order: Vec<Uid>,
}

impl Default for PriorityQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueues {
    /// Creates the structure with only the empty offline queue. Realtime uid
    /// queues are added as submissions arrive.
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        queues.insert(OFFLINE_UID, VecDeque::new());
        Self {
            queues,
            uid_order: vec![OFFLINE_UID],
        }
    }

    /// Appends `key` to `uid`'s queue.
    ///
    /// A newly tracked uid enters the order at the front when `is_top` says
    /// the uid is currently foreground, otherwise immediately ahead of the
    /// offline anchor. An already tracked, non-front uid that is foreground
    /// is promoted to the front.
    pub fn enqueue(&mut self, uid: Uid, key: SessionKey, is_top: bool) {
        if uid != OFFLINE_UID {
            if !self.queues.contains_key(&uid) {
                if is_top {
                    self.uid_order.insert(0, uid);
                } else {
                    // The anchor is always last; slot in just ahead of it.
                    let anchor = self.uid_order.len() - 1;
                    self.uid_order.insert(anchor, uid);
                }
            } else if is_top && self.uid_order.first() != Some(&uid) {
                self.uid_order.retain(|u| *u != uid);
                self.uid_order.insert(0, uid);
            }
        }
        self.queues.entry(uid).or_default().push_back(key);
    }

    /// Deletes `key` from `uid`'s queue. When the queue of a non-offline uid
    /// empties, the uid leaves the order entirely; returns `true` in that
    /// case so the caller can re-apply the foreground set.
    pub fn remove(&mut self, uid: Uid, key: &SessionKey) -> bool {
        let Some(queue) = self.queues.get_mut(&uid) else {
            error!(%key, uid, "no queue for uid");
            return false;
        };
        let Some(pos) = queue.iter().position(|k| k == key) else {
            error!(%key, uid, "session not in uid queue");
            return false;
        };
        queue.remove(pos);

        if uid != OFFLINE_UID && queue.is_empty() {
            self.queues.remove(&uid);
            self.uid_order.retain(|u| *u != uid);
            return true;
        }
        false
    }

    /// Head of the first non-empty queue in uid order, or `None` when every
    /// queue is empty.
    pub fn top_session_key(&self) -> Option<SessionKey> {
        for uid in &self.uid_order {
            if let Some(key) = self.queues.get(uid).and_then(|q| q.front()) {
                return Some(*key);
            }
        }
        None
    }

    /// Promotes the tracked uids of `uids` to the front of the order,
    /// keeping their relative order as given. `keep_front`, when tracked,
    /// is placed ahead of the whole promoted set; the offline anchor is
    /// never moved.
    pub fn move_uids_to_top(&mut self, uids: &[Uid], keep_front: Option<Uid>) {
        if uids.is_empty() {
            return;
        }

        let mut front: Vec<Uid> = Vec::new();
        if let Some(kept) = keep_front {
            if kept != OFFLINE_UID && self.queues.contains_key(&kept) {
                front.push(kept);
            }
        }
        for &uid in uids {
            if uid != OFFLINE_UID
                && self.queues.contains_key(&uid)
                && !front.contains(&uid)
            {
                front.push(uid);
            }
        }
        if front.is_empty() {
            return;
        }

        self.uid_order.retain(|u| !front.contains(u));
        for &uid in front.iter().rev() {
            self.uid_order.insert(0, uid);
        }
    }

    /// Current uid order, offline anchor last.
    pub fn uid_order(&self) -> &[Uid] {
        &self.uid_order
    }

    pub fn is_tracked(&self, uid: Uid) -> bool {
        self.queues.contains_key(&uid)
    }

    /// Total number of queued session keys across all uids.
    pub fn session_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// All session keys in scheduling order: uid order first, FIFO within a
    /// uid.
    pub fn keys_in_order(&self) -> Vec<SessionKey> {
        let mut keys = Vec::with_capacity(self.session_count());
        for uid in &self.uid_order {
            if let Some(queue) = self.queues.get(uid) {
                keys.extend(queue.iter().copied());
            }
        }
        keys
    }

    /// Queue of a single uid, if tracked.
    pub fn queue(&self, uid: Uid) -> Option<&VecDeque<SessionKey>> {
        self.queues.get(&uid)
    }
}
