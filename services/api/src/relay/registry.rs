//! Process-wide table of live relays, one per conversation.
//!
//! The table is a `HashMap` behind a single `parking_lot::Mutex`. Every
//! operation is a constant-time map update under that lock and nothing
//! awaits while holding it, so unrelated conversations only ever contend
//! for a few instructions.
//!
//! Entries go through two maps. `active` is the at-most-one-per-id table
//! that `acquire` checks. When a relay is released (or closes on its own)
//! its entry moves to `draining` until the session has published its final
//! `ended` status; a new relay for the same id waits on that before opening
//! its own upstream connection.

use callrelay_core::ConversationId;
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use utoipa::ToSchema;

/// Lifecycle of one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl RelayState {
    pub fn is_open(self) -> bool {
        matches!(self, RelayState::Connecting | RelayState::Active)
    }
}

/// Everything a freshly created session needs to own its registry slot.
#[derive(Debug)]
pub struct RelayTicket {
    pub conversation_id: ConversationId,
    pub generation: u64,
    /// Cancelled by `release`; the session's single stop signal.
    pub cancel: CancellationToken,
    pub state: Arc<watch::Sender<RelayState>>,
    /// Cancelled by the session once its terminal status has been published.
    pub finished: CancellationToken,
    /// The previous session for this id, if it is still draining.
    pub predecessor: Option<CancellationToken>,
}

#[derive(Debug)]
pub enum Acquire {
    AlreadyActive,
    Created(RelayTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Removed,
    NotFound,
}

/// Point-in-time view of one active relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub conversation_id: ConversationId,
    pub generation: u64,
    pub state: RelayState,
}

struct ActiveEntry {
    generation: u64,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RelayState>>,
    finished: CancellationToken,
}

struct DrainingEntry {
    generation: u64,
    finished: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    active: HashMap<ConversationId, ActiveEntry>,
    draining: HashMap<ConversationId, DrainingEntry>,
}

#[derive(Default)]
pub struct RelayRegistry {
    inner: Mutex<Inner>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims the slot for `id`.
    ///
    /// Exactly one of any number of concurrent callers for the same id gets
    /// `Created`; the rest get `AlreadyActive` and must do nothing.
    pub fn acquire(&self, id: &ConversationId) -> Acquire {
        let mut inner = self.inner.lock();
        if inner.active.contains_key(id) {
            return Acquire::AlreadyActive;
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let (state, _) = watch::channel(RelayState::Connecting);
        let state = Arc::new(state);
        let predecessor = inner.draining.get(id).map(|d| d.finished.clone());

        inner.active.insert(
            id.clone(),
            ActiveEntry {
                generation,
                cancel: cancel.clone(),
                state: state.clone(),
                finished: finished.clone(),
            },
        );
        debug!(conversation_id = %id, generation, "Relay slot acquired");

        Acquire::Created(RelayTicket {
            conversation_id: id.clone(),
            generation,
            cancel,
            state,
            finished,
            predecessor,
        })
    }

    /// Removes the active relay for `id` and signals it to close.
    ///
    /// The session is marked `Closing` and cancelled before the lock is
    /// dropped; its socket teardown continues on the session's own task.
    pub fn release(&self, id: &ConversationId) -> Release {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.active.remove(id) else {
            return Release::NotFound;
        };

        entry.state.send_if_modified(|state| {
            if state.is_open() {
                *state = RelayState::Closing;
                true
            } else {
                false
            }
        });
        entry.cancel.cancel();
        inner.draining.insert(
            id.clone(),
            DrainingEntry {
                generation: entry.generation,
                finished: entry.finished,
            },
        );
        debug!(conversation_id = %id, generation = entry.generation, "Relay slot released");
        Release::Removed
    }

    /// Called by a session that is closing on its own. Moves its entry out
    /// of the active table unless a `release` already did, or the slot now
    /// belongs to a newer generation.
    pub fn detach(&self, id: &ConversationId, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        let owns_slot = inner
            .active
            .get(id)
            .is_some_and(|entry| entry.generation == generation);
        if !owns_slot {
            return false;
        }
        if let Some(entry) = inner.active.remove(id) {
            inner.draining.insert(
                id.clone(),
                DrainingEntry {
                    generation,
                    finished: entry.finished,
                },
            );
        }
        true
    }

    /// Forgets a drained session once its terminal status is out.
    pub fn retire(&self, id: &ConversationId, generation: u64) {
        let mut inner = self.inner.lock();
        if inner
            .draining
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.draining.remove(id);
        }
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.inner.lock().active.contains_key(id)
    }

    pub fn state(&self, id: &ConversationId) -> Option<RelayState> {
        self.inner.lock().active.get(id).map(|e| *e.state.borrow())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<RelaySnapshot> {
        let inner = self.inner.lock();
        let mut relays: Vec<_> = inner
            .active
            .iter()
            .map(|(id, entry)| RelaySnapshot {
                conversation_id: id.clone(),
                generation: entry.generation,
                state: *entry.state.borrow(),
            })
            .collect();
        relays.sort_by_key(|r| r.generation);
        relays
    }

    /// Completion signals for every session that has not yet published its
    /// terminal status, active or draining.
    pub fn finished_signals(&self) -> Vec<CancellationToken> {
        let inner = self.inner.lock();
        inner
            .active
            .values()
            .map(|e| e.finished.clone())
            .chain(inner.draining.values().map(|e| e.finished.clone()))
            .collect()
    }

    /// Releases every active relay; used on shutdown.
    pub fn release_all(&self) -> usize {
        let ids: Vec<ConversationId> = self.inner.lock().active.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.release(id) == Release::Removed)
            .count()
    }
}
