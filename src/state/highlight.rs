use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{task::JoinHandle, time::sleep};
use tracing::debug;

use crate::dao::models::{Highlight, Jam, JamSongId};
use crate::state::store::VersionedStore;

/// How long a row stays marked after climbing the ranking.
pub const REORDER_HIGHLIGHT: Duration = Duration::from_millis(2_000);
/// How long the celebration shows after an upvote.
pub const CELEBRATE_HIGHLIGHT: Duration = Duration::from_millis(10_000);
/// How long a freshly added song stays marked.
pub const JUST_ADDED_HIGHLIGHT: Duration = Duration::from_millis(15_000);

/// Self-expiring annotations a row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HighlightKind {
    /// Row moved up after a vote.
    Reorder,
    /// Row received an upvote.
    Celebrate,
    /// Row was just added by this user.
    JustAdded,
}

impl HighlightKind {
    /// Time before the annotation clears itself.
    pub fn duration(self) -> Duration {
        match self {
            HighlightKind::Reorder => REORDER_HIGHLIGHT,
            HighlightKind::Celebrate => CELEBRATE_HIGHLIGHT,
            HighlightKind::JustAdded => JUST_ADDED_HIGHLIGHT,
        }
    }

    fn tag(self) -> Option<Highlight> {
        match self {
            HighlightKind::Reorder => Some(Highlight::Warning),
            HighlightKind::JustAdded => Some(Highlight::Success),
            HighlightKind::Celebrate => None,
        }
    }

    fn apply(self, jam: &mut Jam, id: &JamSongId) -> bool {
        let Some(entry) = jam.songs.iter_mut().find(|entry| &entry.id == id) else {
            return false;
        };
        match self.tag() {
            Some(tag) => entry.highlight = Some(tag),
            None => entry.show_rainbow_heart = true,
        }
        true
    }

    fn clear(self, jam: &mut Jam, id: &JamSongId) -> bool {
        let Some(entry) = jam.songs.iter_mut().find(|entry| &entry.id == id) else {
            return false;
        };
        match self.tag() {
            Some(tag) if entry.highlight == Some(tag) => {
                entry.highlight = None;
                true
            }
            Some(_) => false,
            None if entry.show_rainbow_heart => {
                entry.show_rainbow_heart = false;
                true
            }
            None => false,
        }
    }
}

struct PendingClear {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    pending: HashMap<(JamSongId, HighlightKind), PendingClear>,
    next_generation: u64,
}

/// Applies annotations to a jam and clears each one after its delay.
///
/// A newer request for the same row and kind replaces the pending timer.
pub struct HighlightScheduler {
    store: Arc<VersionedStore<Jam>>,
    timers: Mutex<Timers>,
}

impl HighlightScheduler {
    /// Build a scheduler annotating `store`.
    pub fn new(store: Arc<VersionedStore<Jam>>) -> Arc<Self> {
        Arc::new(Self {
            store,
            timers: Mutex::new(Timers::default()),
        })
    }

    /// Mark the row now and schedule the matching clear.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(self: &Arc<Self>, id: &JamSongId, kind: HighlightKind) {
        if !self.store.annotate(|jam| kind.apply(jam, id)) {
            return;
        }

        let mut timers = self.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let weak: Weak<Self> = Arc::downgrade(self);
        let target = id.clone();
        let handle = tokio::spawn(async move {
            sleep(kind.duration()).await;
            if let Some(scheduler) = weak.upgrade() {
                scheduler.expire(&target, kind, generation);
            }
        });

        if let Some(previous) = timers
            .pending
            .insert((id.clone(), kind), PendingClear { generation, handle })
        {
            previous.handle.abort();
            debug!(jam_song_id = %id, ?kind, "replaced pending highlight timer");
        }
    }

    fn expire(&self, id: &JamSongId, kind: HighlightKind, generation: u64) {
        {
            let mut timers = self.lock();
            let key = (id.clone(), kind);
            match timers.pending.get(&key) {
                Some(pending) if pending.generation == generation => {
                    timers.pending.remove(&key);
                }
                _ => return,
            }
        }
        self.store.annotate(|jam| kind.clear(jam, id));
    }

    /// Abort every pending clear.
    pub fn cancel_all(&self) {
        let mut timers = self.lock();
        let count = timers.pending.len();
        for (_, pending) in timers.pending.drain() {
            pending.handle.abort();
        }
        if count > 0 {
            debug!(count, "canceled pending highlight timers");
        }
    }

    /// Number of clears still waiting.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
