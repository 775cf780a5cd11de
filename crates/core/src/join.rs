//! Join counter with dispatch-group semantics.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

type Notify = Box<dyn FnOnce() + Send>;

/// Counts outstanding members and fires `notify` once all have left.
///
/// A group opens with one pending count held by its creator, so members
/// finishing while others are still being added cannot fire it early. The
/// creator releases that count with a final [`JoinGroup::leave`].
pub struct JoinGroup {
    pending: AtomicUsize,
    notify: Mutex<Option<Notify>>,
}

impl JoinGroup {
    /// Open a group.
    pub fn new<N>(notify: N) -> Self
    where
        N: FnOnce() + Send + 'static,
    {
        Self {
            pending: AtomicUsize::new(1),
            notify: Mutex::new(Some(Box::new(notify))),
        }
    }

    /// Register one more member.
    pub fn enter(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// A member finished.
    pub fn leave(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let notify = self.notify.lock().take();
            if let Some(notify) = notify {
                notify();
            }
        }
    }

    /// Members (plus the creator's count) not yet left.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for JoinGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinGroup")
            .field("pending", &self.pending())
            .finish()
    }
}
