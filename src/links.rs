//! The link graph: bidirectional pid-to-pid links.
//!
//! Links are unordered pairs. Establishing an already-present link first
//! removes the old pair, so the relation stays symmetric and idempotent;
//! removing one removes both orientations. The mutex is confined to this
//! module; callers get the affected peers back and do their notifying
//! outside the lock, because a broken link between two local mailboxes
//! re-enters the node.

use crate::core::Pid;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub(crate) struct LinkGraph {
    links: Mutex<Vec<(Pid, Pid)>>,
}

fn is_pair(entry: &(Pid, Pid), a: &Pid, b: &Pid) -> bool {
    (entry.0 == *a && entry.1 == *b) || (entry.0 == *b && entry.1 == *a)
}

impl LinkGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Establishes a link between `a` and `b`; at most one pair exists per
    /// unordered couple.
    pub(crate) fn link(&self, a: Pid, b: Pid) {
        let mut links = self.links.lock();
        links.retain(|entry| !is_pair(entry, &a, &b));
        links.push((a, b));
    }

    /// Removes the link between `a` and `b`, in either orientation.
    pub(crate) fn unlink(&self, a: &Pid, b: &Pid) {
        self.links.lock().retain(|entry| !is_pair(entry, a, b));
    }

    /// Returns `true` if a link exists between `a` and `b`.
    pub(crate) fn is_linked(&self, a: &Pid, b: &Pid) -> bool {
        self.links.lock().iter().any(|entry| is_pair(entry, a, b))
    }

    /// Atomically removes every link involving `dying`, returning the
    /// peers that need an exit signal.
    pub(crate) fn take_links_for(&self, dying: &Pid) -> Vec<Pid> {
        let mut removed = Vec::new();
        self.links.lock().retain(|(a, b)| {
            if a == dying {
                removed.push(b.clone());
                false
            } else if b == dying {
                removed.push(a.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Atomically removes every link with an endpoint on `node`, returning
    /// the removed pairs.
    ///
    /// Used when a connection drops and the remote endpoints become
    /// unreachable.
    pub(crate) fn take_links_to_node(&self, node: &str) -> Vec<(Pid, Pid)> {
        let mut removed = Vec::new();
        self.links.lock().retain(|entry| {
            if entry.0.is_on(node) || entry.1.is_on(node) {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}
