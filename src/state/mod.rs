/// Timed row highlights.
pub mod highlight;
/// Setlist ranking and grouping.
pub mod ordering;
pub mod reducer;
/// Realtime bridge lifecycle.
pub mod state_machine;
/// Copy-on-write versioned store.
pub mod store;
/// Vote transitions and the highlights they trigger.
pub mod transitions;

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::dao::models::{Jam, JamId, JamSong, JamSongId};

pub use self::highlight::{HighlightKind, HighlightScheduler};
pub use self::ordering::{Setlist, SortMethod, ViewOptions};
pub use self::state_machine::{BridgeAction, BridgePhase, BridgeStateMachine, InvalidTransition};
pub use self::store::{Commit, Snapshot, Version, VersionedStore};
use self::transitions::{VoteTransition, VoteUpdate};

/// Shared handle to a mounted jam view.
pub type SharedView = Arc<JamView>;

/// Page-session owner of one jam: its versioned state, view options and highlight timers.
pub struct JamView {
    jam_id: JamId,
    store: Arc<VersionedStore<Jam>>,
    highlights: Arc<HighlightScheduler>,
    options: RwLock<ViewOptions>,
    confirmed: DashMap<JamSongId, Version>,
}

impl JamView {
    /// Mount a view over `jam`, ranking the stored list when sorting by votes.
    pub fn new(jam: Jam, options: ViewOptions) -> SharedView {
        let jam = match options.sort_method {
            SortMethod::Votes => {
                let ranked = ordering::rank_by_votes(&jam.songs);
                jam.with_songs(ranked)
            }
            SortMethod::Order => jam,
        };
        let store = Arc::new(VersionedStore::new(jam));
        Arc::new(Self {
            jam_id: store.value().id.clone(),
            highlights: HighlightScheduler::new(Arc::clone(&store)),
            store,
            options: RwLock::new(options),
            confirmed: DashMap::new(),
        })
    }

    /// Identifier of the mounted jam.
    pub fn jam_id(&self) -> &JamId {
        &self.jam_id
    }

    /// Versioned store holding the jam.
    pub fn store(&self) -> &Arc<VersionedStore<Jam>> {
        &self.store
    }

    /// Current jam snapshot.
    pub fn jam(&self) -> Arc<Jam> {
        self.store.value()
    }

    /// Entry by jam song id, cloned out of the current snapshot.
    pub fn entry(&self, id: &JamSongId) -> Option<JamSong> {
        self.jam().entry(id).cloned()
    }

    /// Observe every change to the jam, data or annotation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Jam>> {
        self.store.subscribe()
    }

    /// Current display options.
    pub fn options(&self) -> ViewOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggle grouping by song classification.
    pub fn set_grouping(&self, enabled: bool) {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .grouping_enabled = enabled;
    }

    /// Switch the sort method; switching to votes re-ranks the stored list.
    pub fn set_sort_method(&self, method: SortMethod) {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sort_method = method;
        if method == SortMethod::Votes {
            self.apply(ordering::rank_by_votes);
        }
    }

    /// Arranged setlist for the current snapshot and options.
    pub fn setlist(&self) -> Setlist {
        ordering::group_and_sort(&self.jam().songs, self.options())
    }

    /// Commit the song list produced by `change`; returns whether anything changed.
    pub fn apply<F>(&self, change: F) -> bool
    where
        F: FnOnce(&[JamSong]) -> Vec<JamSong>,
    {
        self.store
            .commit(|jam| {
                let next = change(&jam.songs);
                (next != jam.songs).then(|| jam.with_songs(next))
            })
            .changed()
    }

    /// Apply a server vote count; the entry counts as confirmed even when the count is unchanged.
    pub fn confirm_vote(&self, id: &JamSongId, votes: i64) -> Option<VoteTransition> {
        if self.entry(id).is_none() {
            return None;
        }
        let sort = self.options().sort_method;
        let mut outcome = None;
        self.store.confirm(|jam, version| {
            self.confirmed.insert(id.clone(), version);
            let transition = transitions::vote(&jam.songs, id, VoteUpdate::Count(votes), sort)?;
            let next = jam.with_songs(transition.songs.clone());
            outcome = Some(transition);
            Some(next)
        });
        if let Some(transition) = &outcome {
            self.highlight_all(id, &transition.highlights);
        }
        outcome
    }

    /// Apply a server played flag; returns whether the displayed value changed.
    pub fn confirm_played(&self, id: &JamSongId, played: bool) -> bool {
        if self.entry(id).is_none() {
            return false;
        }
        let mut changed = false;
        self.store.confirm(|jam, version| {
            self.confirmed.insert(id.clone(), version);
            let songs = reducer::apply_played(&jam.songs, id, played);
            changed = songs != jam.songs;
            changed.then(|| jam.with_songs(songs))
        });
        changed
    }

    /// Whether a server event touched the entry after `version`.
    pub fn confirmed_since(&self, id: &JamSongId, version: Version) -> bool {
        self.confirmed
            .get(id)
            .is_some_and(|confirmed| *confirmed > version)
    }

    /// Annotate a row and schedule its expiry.
    pub fn highlight(&self, id: &JamSongId, kind: HighlightKind) {
        self.highlights.schedule(id, kind);
    }

    /// Annotate a row with several kinds at once.
    pub fn highlight_all(&self, id: &JamSongId, kinds: &[HighlightKind]) {
        for kind in kinds {
            self.highlight(id, *kind);
        }
    }

    /// Highlight timers still pending.
    pub fn pending_highlights(&self) -> usize {
        self.highlights.pending()
    }

    /// Whether the view still accepts changes.
    pub fn is_mounted(&self) -> bool {
        self.store.is_open()
    }

    /// Cancel timers and stop accepting changes.
    pub fn unmount(&self) {
        self.highlights.cancel_all();
        self.store.close();
        debug!(jam_id = %self.jam_id, "jam view unmounted");
    }
}
