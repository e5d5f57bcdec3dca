//! Attached users and the session membership list
//!
//! Each user is one transport connection attached to a session. Membership
//! is a doubly-linked order over stable handles in a map: insert-at-head and
//! remove-by-handle are both O(1), and one mutex per session guards all
//! membership mutation. Join/leave callbacks run outside that lock; only the
//! link/splice itself runs inside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use postern_core::SessionError;

use crate::session::UserHook;

/// Stable handle of an attached user, unique within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// One user attached to a session
///
/// The user's transport is represented by its outbound byte queue (drained
/// by the worker's writer task) and a cancellation token that retires the
/// user's reader/writer pair when the user detaches.
pub struct UserSession {
    id: UserId,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    leave_handler: Mutex<Option<UserHook>>,
    detached: AtomicBool,
}

impl UserSession {
    pub(crate) fn new(id: UserId, outbound: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
            leave_handler: Mutex::new(None),
            detached: AtomicBool::new(false),
        }
    }

    /// Handle of this user within its session
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Queue bytes for delivery on this user's own transport
    pub async fn send_raw(&self, bytes: Bytes) -> Result<(), SessionError> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| SessionError::UserDetached)
    }

    /// Install a departure callback specific to this user, overriding the
    /// session-wide one
    pub fn set_leave_handler(&self, handler: UserHook) {
        *self
            .leave_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn take_leave_handler(&self) -> Option<UserHook> {
        self.leave_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Cancellation token retiring this user's reader/writer pair
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the user's transport by cancelling its I/O tasks
    pub(crate) fn retire(&self) {
        self.cancel.cancel();
    }

    /// Claim the right to detach this user; only the first claimant wins,
    /// so concurrent removal runs the departure path exactly once
    pub(crate) fn claim_detached(&self) -> bool {
        !self.detached.swap(true, Ordering::SeqCst)
    }
}

/// The membership list of one session
pub(crate) struct Roster {
    inner: Mutex<RosterInner>,
    next_id: AtomicU64,
}

struct RosterInner {
    head: Option<UserId>,
    entries: HashMap<UserId, RosterEntry>,
}

struct RosterEntry {
    user: Arc<UserSession>,
    prev: Option<UserId>,
    next: Option<UserId>,
}

impl Roster {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RosterInner {
                head: None,
                entries: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RosterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mint_id(&self) -> UserId {
        UserId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Link a user in as the new head
    pub(crate) fn insert_head(&self, user: Arc<UserSession>) {
        let id = user.id();
        let mut inner = self.lock();

        let next = inner.head;
        if let Some(old_head) = next {
            if let Some(entry) = inner.entries.get_mut(&old_head) {
                entry.prev = Some(id);
            }
        }

        inner.entries.insert(
            id,
            RosterEntry {
                user,
                prev: None,
                next,
            },
        );
        inner.head = Some(id);
    }

    /// Splice a user out of the list; returns false if it was not linked
    pub(crate) fn remove(&self, id: UserId) -> bool {
        let mut inner = self.lock();

        let Some(entry) = inner.entries.remove(&id) else {
            return false;
        };

        match entry.prev {
            Some(prev) => {
                if let Some(prev_entry) = inner.entries.get_mut(&prev) {
                    prev_entry.next = entry.next;
                }
            }
            None => inner.head = entry.next,
        }

        if let Some(next) = entry.next {
            if let Some(next_entry) = inner.entries.get_mut(&next) {
                next_entry.prev = entry.prev;
            }
        }

        true
    }

    /// Current head of the list, if any
    pub(crate) fn head(&self) -> Option<Arc<UserSession>> {
        let inner = self.lock();
        inner
            .head
            .and_then(|id| inner.entries.get(&id))
            .map(|entry| Arc::clone(&entry.user))
    }

    /// All attached users in list order, head first
    pub(crate) fn snapshot(&self) -> Vec<Arc<UserSession>> {
        let inner = self.lock();
        let mut users = Vec::with_capacity(inner.entries.len());
        let mut cursor = inner.head;
        while let Some(id) = cursor {
            let Some(entry) = inner.entries.get(&id) else {
                break;
            };
            users.push(Arc::clone(&entry.user));
            cursor = entry.next;
        }
        users
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
