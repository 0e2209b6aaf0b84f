use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dashmap::DashSet;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        jam_api::JamApi,
        ledger::VoteLedger,
        models::{Jam, JamId, JamSong, JamSongId, SongId, SongPatch},
    },
    dto::requests::VoteAction,
    error::ServiceError,
    services::{
        channels::PushTransport,
        notifications::Notifier,
        optimistic::{OptimisticExecutor, bounded},
        realtime::{BridgeError, JamChannelBridge},
    },
    state::{
        HighlightKind, JamView, Setlist, SharedView, ViewOptions, reducer,
        transitions::{self, VoteUpdate},
    },
};

/// Result of adding a catalog song to the jam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The song joined the jam as this entry.
    Added(JamSongId),
    /// The jam already held the song; nothing changed.
    AlreadyPresent,
}

/// One mounted jam page: local actions go through the optimistic executor, remote
/// ones through the channel bridge.
pub struct JamSession {
    view: SharedView,
    api: Arc<dyn JamApi>,
    ledger: Arc<VoteLedger>,
    notifier: Notifier,
    executor: OptimisticExecutor<Jam>,
    voting: DashSet<JamSongId>,
    bridge: Mutex<Option<JamChannelBridge>>,
}

impl JamSession {
    /// Fetch the jam and mount a view over it.
    pub async fn open(
        api: Arc<dyn JamApi>,
        jam_id: JamId,
        ledger: Arc<VoteLedger>,
        notifier: Notifier,
        options: ViewOptions,
        remote_timeout: Option<Duration>,
    ) -> Result<Self, ServiceError> {
        let jam = bounded(remote_timeout, api.get_jam(jam_id.clone())).await?;
        info!(jam_id = %jam_id, songs = jam.songs.len(), "jam loaded");
        Ok(Self::with_jam(api, jam, ledger, notifier, options).with_timeout(remote_timeout))
    }

    /// Mount a view over an already fetched jam.
    pub fn with_jam(
        api: Arc<dyn JamApi>,
        jam: Jam,
        ledger: Arc<VoteLedger>,
        notifier: Notifier,
        options: ViewOptions,
    ) -> Self {
        let view = JamView::new(jam, options);
        let executor = OptimisticExecutor::new(Arc::clone(view.store()), notifier.clone());
        Self {
            view,
            api,
            ledger,
            notifier,
            executor,
            voting: DashSet::new(),
            bridge: Mutex::new(None),
        }
    }

    /// Override the bound on remote calls.
    pub fn with_timeout(mut self, remote_timeout: Option<Duration>) -> Self {
        self.executor = self.executor.clone().with_timeout(remote_timeout);
        self
    }

    /// Mounted view over the jam.
    pub fn view(&self) -> &SharedView {
        &self.view
    }

    /// Identifier of the jam this session shows.
    pub fn jam_id(&self) -> &JamId {
        self.view.jam_id()
    }

    /// Arranged setlist for display.
    pub fn setlist(&self) -> Setlist {
        self.view.setlist()
    }

    /// Whether this device voted for the entry.
    pub fn has_voted(&self, id: &JamSongId) -> bool {
        self.ledger.has_voted(id)
    }

    /// Device-local record of votes and the captain name.
    pub fn ledger(&self) -> &Arc<VoteLedger> {
        &self.ledger
    }

    /// Start applying events from the jam's push channel.
    ///
    /// A bridge mounted earlier is torn down first; the view stays mounted.
    pub fn mount_realtime(&self, transport: Arc<dyn PushTransport>) -> Result<(), BridgeError> {
        let mut slot = self.lock_bridge();
        if let Some(previous) = slot.take() {
            if let Err(err) = previous.unmount() {
                debug!(error = %err, "previous bridge already unmounted");
            }
        }
        let bridge = JamChannelBridge::new(Arc::clone(&self.view), transport, self.notifier.clone());
        bridge.mount()?;
        *slot = Some(bridge);
        Ok(())
    }

    /// Vote if this device has not voted for the entry yet, unvote otherwise.
    ///
    /// A second toggle while the first is still in flight is refused.
    pub async fn toggle_vote(&self, id: &JamSongId) -> Result<VoteAction, ServiceError> {
        let Some(_in_flight) = InFlightVote::acquire(&self.voting, id) else {
            return Err(ServiceError::InvalidState(
                "a vote for this song is already in progress".into(),
            ));
        };
        let action = if self.ledger.has_voted(id) {
            VoteAction::Unvote
        } else {
            VoteAction::Vote
        };
        self.vote(id, action).await.map(|()| action)
    }

    /// Apply a vote locally, record it in the ledger and confirm it remotely.
    ///
    /// On failure the delta is undone, unless the server reported a count for the
    /// entry in the meantime; that count already leaves the failed vote out.
    pub async fn vote(&self, id: &JamSongId, action: VoteAction) -> Result<(), ServiceError> {
        if self.view.entry(id).is_none() {
            return Err(ServiceError::NotFound("Song not found in jam".into()));
        }

        let sort = self.view.options().sort_method;
        let mut highlights = Vec::new();
        let pending = self.executor.begin("voting for song", |jam| {
            let transition = transitions::vote(&jam.songs, id, VoteUpdate::Delta(action), sort)?;
            highlights = transition.highlights;
            Some(jam.with_songs(transition.songs))
        })?;
        let since = pending.version();
        let view = Arc::clone(&self.view);
        let inverse_id = id.clone();
        let pending = pending.with_compensation(move |jam: &Jam| {
            if view.confirmed_since(&inverse_id, since) {
                return None;
            }
            transitions::vote(&jam.songs, &inverse_id, VoteUpdate::Delta(action.inverse()), sort)
                .map(|transition| jam.with_songs(transition.songs))
        });

        self.record_vote(id, action);
        self.view.highlight_all(id, &highlights);

        let outcome = self
            .executor
            .call(self.api.vote(self.jam_id().clone(), id.clone(), action))
            .await;
        let result = self.executor.settle(pending, outcome);
        if result.is_err() {
            self.record_vote(id, action.inverse());
        }
        result
    }

    /// Flip the played flag; returns the new value.
    ///
    /// On failure the previous flag comes back only while the optimistic one is still
    /// shown and no server event touched the entry.
    pub async fn toggle_played(&self, id: &JamSongId) -> Result<bool, ServiceError> {
        if self.view.entry(id).is_none() {
            return Err(ServiceError::NotFound("Song not found in jam".into()));
        }

        let pending = self
            .executor
            .begin("updating played status", |jam| {
                Some(jam.with_songs(reducer::apply_toggle_played(&jam.songs, id)))
            })?;
        let played = pending
            .before()
            .entry(id)
            .map(|entry| !entry.played)
            .unwrap_or_default();
        let since = pending.version();
        let view = Arc::clone(&self.view);
        let inverse_id = id.clone();
        let pending = pending.with_compensation(move |jam: &Jam| {
            if view.confirmed_since(&inverse_id, since) {
                return None;
            }
            let current = jam.entry(&inverse_id)?;
            (current.played == played)
                .then(|| jam.with_songs(reducer::apply_played(&jam.songs, &inverse_id, !played)))
        });

        self.executor
            .run(
                pending,
                self.api.toggle_played(self.jam_id().clone(), id.clone()),
            )
            .await?;
        Ok(played)
    }

    /// Remove the entry referencing `song_id` from the jam.
    pub async fn remove_song(&self, song_id: &SongId) -> Result<(), ServiceError> {
        let jam = self.view.jam();
        let (index, entry) = jam
            .songs
            .iter()
            .enumerate()
            .find(|(_, entry)| &entry.song.id == song_id)
            .map(|(index, entry)| (index, entry.clone()))
            .ok_or_else(|| ServiceError::NotFound("Song not found in jam".into()))?;

        let pending = self
            .executor
            .begin("removing song", |jam| {
                Some(jam.with_songs(reducer::apply_removal(&jam.songs, song_id)))
            })?
            .with_compensation(move |jam: &Jam| {
                let songs = reducer::apply_reinsertion(&jam.songs, &entry, index);
                (songs != jam.songs).then(|| jam.with_songs(songs))
            })
            .with_success("Song removed from jam");

        self.executor
            .run(
                pending,
                self.api.remove_song(self.jam_id().clone(), song_id.clone()),
            )
            .await
    }

    /// Edit the catalog song behind a jam entry.
    pub async fn edit_song(&self, id: &JamSongId, patch: SongPatch) -> Result<(), ServiceError> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(ServiceError::InvalidInput("nothing to update".into()));
        }
        let entry = self
            .view
            .entry(id)
            .ok_or_else(|| ServiceError::NotFound("Song not found in jam".into()))?;
        let song_id = entry.song.id.clone();
        let inverse = patch.inverse_for(&entry.song);

        let pending = self
            .executor
            .begin("updating song", |jam| {
                Some(jam.with_songs(reducer::apply_edit(&jam.songs, &song_id, &patch)))
            })?;
        let inverse_song = song_id.clone();
        let pending = pending
            .with_compensation(move |jam: &Jam| {
                Some(jam.with_songs(reducer::apply_edit(&jam.songs, &inverse_song, &inverse)))
            })
            .with_success("Song updated successfully");

        self.executor
            .run(pending, self.api.update_song(song_id, patch))
            .await
            .map(|_| ())
    }

    /// Add a catalog song, vote for it on this device and mark it as just added.
    pub async fn add_song(&self, song_id: &SongId) -> Result<AddOutcome, ServiceError> {
        if !self.view.is_mounted() {
            return Err(ServiceError::Unmounted);
        }

        let response = match bounded(
            self.executor.remote_timeout(),
            self.api.add_songs(self.jam_id().clone(), vec![song_id.clone()]),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(jam_id = %self.jam_id(), song_id = %song_id, error = %err, "adding song failed");
                if self.view.is_mounted() {
                    self.notifier
                        .error(format!("Error adding song: {}", err.user_message()));
                }
                return Err(err);
            }
        };
        if !self.view.is_mounted() {
            return Err(ServiceError::Unmounted);
        }

        let server_entry = response
            .jam
            .as_ref()
            .and_then(|jam| jam.songs.iter().find(|entry| &entry.song.id == song_id))
            .cloned();

        if response.skipped_songs.contains(song_id) {
            let title = self
                .local_entry(song_id)
                .or(server_entry)
                .map(|entry| entry.song.title)
                .unwrap_or_else(|| song_id.to_string());
            info!(jam_id = %self.jam_id(), song_id = %song_id, "song already in jam");
            self.notifier
                .warning(format!("\"{title}\" is already in the jam"));
            return Ok(AddOutcome::AlreadyPresent);
        }

        let entry = server_entry.ok_or_else(|| {
            ServiceError::InvalidState("the server did not return the added song".into())
        })?;
        self.view
            .apply(|songs| reducer::apply_addition(songs, &entry));

        if !self.ledger.has_voted(&entry.id) {
            if let Err(err) = self.vote(&entry.id, VoteAction::Vote).await {
                warn!(jam_song_id = %entry.id, error = %err, "automatic vote for added song failed");
            }
        }
        self.view.highlight(&entry.id, HighlightKind::JustAdded);
        info!(jam_id = %self.jam_id(), jam_song_id = %entry.id, "song added to jam");
        Ok(AddOutcome::Added(entry.id))
    }

    /// Tear down the bridge and the view; pending remote calls complete silently.
    pub fn unmount(&self) {
        if let Some(bridge) = self.lock_bridge().take() {
            if let Err(err) = bridge.unmount() {
                warn!(error = %err, "bridge teardown failed");
            }
        }
        self.view.unmount();
    }

    fn local_entry(&self, song_id: &SongId) -> Option<JamSong> {
        self.view
            .jam()
            .songs
            .iter()
            .find(|entry| &entry.song.id == song_id)
            .cloned()
    }

    fn record_vote(&self, id: &JamSongId, action: VoteAction) {
        match action {
            VoteAction::Vote => self.ledger.mark_voted(id),
            VoteAction::Unvote => self.ledger.clear_vote(id),
        }
    }

    fn lock_bridge(&self) -> MutexGuard<'_, Option<JamChannelBridge>> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks an entry as having a vote in flight until dropped.
struct InFlightVote<'a> {
    voting: &'a DashSet<JamSongId>,
    id: JamSongId,
}

impl<'a> InFlightVote<'a> {
    fn acquire(voting: &'a DashSet<JamSongId>, id: &JamSongId) -> Option<Self> {
        voting.insert(id.clone()).then(|| Self {
            voting,
            id: id.clone(),
        })
    }
}

impl Drop for InFlightVote<'_> {
    fn drop(&mut self) {
        self.voting.remove(&self.id);
    }
}

impl Drop for JamSession {
    fn drop(&mut self) {
        if self.view.is_mounted() {
            self.unmount();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        loopback::{LoopbackJamApi, Operation},
        models::{Highlight, SongKind},
    };
    use crate::dto::events::{EventKind, SongPlayedEvent, VoteEvent, channel_name};
    use serde::Serialize;
    use crate::services::notifications::{Notice, NoticeLevel, drain};
    use crate::services::realtime::testing::eventually;
    use crate::state::SortMethod;
    use crate::state::reducer::fixtures::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        api: LoopbackJamApi,
        session: JamSession,
        notices: UnboundedReceiver<Notice>,
    }

    fn fixture(songs: Vec<JamSong>, realtime: bool) -> Fixture {
        let api = LoopbackJamApi::default();
        for entry in &songs {
            api.insert_song(entry.song.clone());
        }
        api.insert_jam(jam(songs.clone()));
        let (notifier, notices) = Notifier::channel();
        let session = JamSession::with_jam(
            Arc::new(api.clone()),
            jam(songs),
            Arc::new(VoteLedger::in_memory()),
            notifier,
            ViewOptions::default(),
        );
        if realtime {
            let transport: Arc<dyn PushTransport> = api.hub().clone();
            session.mount_realtime(transport).expect("mounts");
        }
        Fixture {
            api,
            session,
            notices,
        }
    }

    fn order(session: &JamSession) -> Vec<String> {
        session
            .view()
            .jam()
            .songs
            .iter()
            .map(|entry| entry.id.to_string())
            .collect()
    }

    fn votes(session: &JamSession, key: &str) -> i64 {
        session.view().entry(&jsid(key)).map(|e| e.votes).unwrap_or(-1)
    }

    fn played(session: &JamSession, key: &str) -> bool {
        session.view().entry(&jsid(key)).is_some_and(|e| e.played)
    }

    /// Publish `payload` as another device's server echo, then wait until the view took it in.
    async fn server_event(fx: &Fixture, kind: EventKind, key: &str, payload: &impl Serialize) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let since = fx.session.view().store().version();
        fx.api
            .hub()
            .publish_json(&channel_name(fx.session.jam_id()), kind.name(), payload);
        eventually(|| fx.session.view().confirmed_since(&jsid(key), since)).await;
    }

    fn held_rejection(fx: &Fixture, operation: Operation) {
        fx.api.reject_next(operation, "Song not found in jam");
        fx.api.delay_next(operation, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn toggling_twice_returns_to_the_start_count() {
        let fx = fixture(vec![banger("a", 2, 1)], true);

        assert_eq!(fx.session.toggle_vote(&jsid("a")).await.unwrap(), VoteAction::Vote);
        assert!(fx.session.has_voted(&jsid("a")));
        assert_eq!(votes(&fx.session, "a"), 3);

        assert_eq!(fx.session.toggle_vote(&jsid("a")).await.unwrap(), VoteAction::Unvote);
        assert!(!fx.session.has_voted(&jsid("a")));
        eventually(|| fx.session.view().jam().songs[0].votes == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_votes_for_the_last_song_move_it_to_the_top() {
        let fx = fixture(vec![banger("a", 3, 1), banger("b", 3, 2), banger("c", 1, 3)], false);

        fx.session.vote(&jsid("c"), VoteAction::Vote).await.unwrap();
        assert_eq!(order(&fx.session), vec!["js-a", "js-b", "js-c"]);
        assert_eq!(fx.session.view().entry(&jsid("c")).unwrap().highlight, None);

        fx.session.vote(&jsid("c"), VoteAction::Vote).await.unwrap();
        fx.session.vote(&jsid("c"), VoteAction::Vote).await.unwrap();
        assert_eq!(order(&fx.session), vec!["js-c", "js-a", "js-b"]);

        let view = fx.session.view();
        assert_eq!(view.entry(&jsid("c")).unwrap().highlight, Some(Highlight::Warning));
        assert_eq!(view.entry(&jsid("a")).unwrap().highlight, None);
        assert!(view.entry(&jsid("c")).unwrap().show_rainbow_heart);
    }

    #[tokio::test]
    async fn rejected_vote_restores_state_and_ledger() {
        let mut fx = fixture(vec![banger("a", 1, 1), banger("b", 0, 2)], false);
        let before = fx.session.view().jam();
        fx.api.reject_next(Operation::Vote, "Song not found in jam");

        let err = fx.session.toggle_vote(&jsid("b")).await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(fx.session.view().jam().songs, before.songs);
        assert!(!fx.session.has_voted(&jsid("b")));
        let notices = drain(&mut fx.notices);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].message, "Error voting for song: Song not found in jam");
    }

    #[tokio::test(start_paused = true)]
    async fn server_count_equal_to_the_optimistic_one_survives_a_rejected_vote() {
        let fx = fixture(vec![banger("a", 2, 1)], true);
        held_rejection(&fx, Operation::Vote);
        let echo = VoteEvent {
            song_id: jsid("a"),
            votes: 3,
        };

        let id_a = jsid("a");
        let (result, ()) = tokio::join!(
            fx.session.toggle_vote(&id_a),
            server_event(&fx, EventKind::Vote, "a", &echo),
        );

        assert!(result.is_err());
        assert_eq!(votes(&fx.session, "a"), 3);
        assert!(!fx.session.has_voted(&jsid("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn server_count_received_mid_flight_is_not_reverted_again() {
        let fx = fixture(vec![banger("a", 2, 1), banger("b", 5, 2)], true);
        held_rejection(&fx, Operation::Vote);
        let echo = VoteEvent {
            song_id: jsid("a"),
            votes: 4,
        };

        let id_a = jsid("a");
        let (result, ()) = tokio::join!(
            fx.session.vote(&id_a, VoteAction::Vote),
            server_event(&fx, EventKind::Vote, "a", &echo),
        );

        assert!(result.is_err());
        assert_eq!(votes(&fx.session, "a"), 4);
        assert_eq!(votes(&fx.session, "b"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_vote_is_undone_on_top_of_other_entries_changes() {
        let fx = fixture(vec![banger("a", 2, 1), banger("b", 5, 2)], true);
        held_rejection(&fx, Operation::Vote);
        let echo = VoteEvent {
            song_id: jsid("b"),
            votes: 6,
        };

        let id_a = jsid("a");
        let (result, ()) = tokio::join!(
            fx.session.vote(&id_a, VoteAction::Vote),
            server_event(&fx, EventKind::Vote, "b", &echo),
        );

        assert!(result.is_err());
        assert_eq!(votes(&fx.session, "a"), 2);
        assert_eq!(votes(&fx.session, "b"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn server_played_flag_survives_a_rejected_toggle() {
        let fx = fixture(vec![ballad("a", 0, 1)], true);
        held_rejection(&fx, Operation::TogglePlayed);
        let echo = SongPlayedEvent {
            song_id: jsid("a"),
            played: true,
        };

        let id_a = jsid("a");
        let (result, ()) = tokio::join!(
            fx.session.toggle_played(&id_a),
            server_event(&fx, EventKind::SongPlayed, "a", &echo),
        );

        assert!(result.is_err());
        assert!(played(&fx.session, "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_toggle_never_flips_a_server_played_flag() {
        let fx = fixture(vec![ballad("a", 0, 1)], true);
        held_rejection(&fx, Operation::TogglePlayed);
        let echo = SongPlayedEvent {
            song_id: jsid("a"),
            played: false,
        };

        let id_a = jsid("a");
        let (result, ()) = tokio::join!(
            fx.session.toggle_played(&id_a),
            server_event(&fx, EventKind::SongPlayed, "a", &echo),
        );

        assert!(result.is_err());
        assert!(!played(&fx.session, "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_toggle_restores_the_flag_after_a_local_vote() {
        let fx = fixture(vec![ballad("a", 0, 1), banger("b", 0, 2)], false);
        held_rejection(&fx, Operation::TogglePlayed);

        let id_a = jsid("a");
        let (toggled, voted) = tokio::join!(fx.session.toggle_played(&id_a), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fx.session.vote(&jsid("b"), VoteAction::Vote).await
        });

        assert!(toggled.is_err());
        voted.unwrap();
        assert!(!played(&fx.session, "a"));
        assert_eq!(votes(&fx.session, "b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_toggle_does_not_block_the_next_one() {
        let fx = fixture(vec![banger("a", 2, 1)], false);
        fx.api.stall_next(Operation::Vote);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), fx.session.toggle_vote(&jsid("a"))).await;

        assert!(abandoned.is_err());
        assert!(fx.session.voting.is_empty());
        assert!(fx.session.toggle_vote(&jsid("a")).await.is_ok());
    }

    #[tokio::test]
    async fn mounting_realtime_twice_keeps_the_view_live() {
        let fx = fixture(vec![banger("a", 0, 1)], true);
        let channel = channel_name(fx.session.jam_id());
        let transport: Arc<dyn PushTransport> = fx.api.hub().clone();

        fx.session.mount_realtime(transport).expect("mounts again");

        assert!(fx.session.view().is_mounted());
        assert_eq!(fx.api.hub().active_channels(), vec![channel.clone()]);
        fx.session.vote(&jsid("a"), VoteAction::Vote).await.unwrap();
        assert_eq!(votes(&fx.session, "a"), 1);

        let echo = VoteEvent {
            song_id: jsid("a"),
            votes: 4,
        };
        fx.api
            .hub()
            .publish_json(&channel, EventKind::Vote.name(), &echo);
        eventually(|| votes(&fx.session, "a") == 4).await;
    }

    #[tokio::test]
    async fn failed_removal_puts_the_entry_back_in_place() {
        let fx = fixture(vec![banger("a", 2, 1), banger("b", 1, 2), banger("c", 0, 3)], false);
        fx.api.fail_next(Operation::RemoveSong);

        assert!(fx.session.remove_song(&sid("b")).await.is_err());
        assert_eq!(order(&fx.session), vec!["js-a", "js-b", "js-c"]);

        fx.session.remove_song(&sid("b")).await.unwrap();
        assert_eq!(order(&fx.session), vec!["js-a", "js-c"]);
    }

    #[tokio::test]
    async fn played_toggle_is_confirmed_by_the_server() {
        let fx = fixture(vec![ballad("a", 0, 1)], true);

        assert!(fx.session.toggle_played(&jsid("a")).await.unwrap());
        assert!(fx.api.jam(fx.session.jam_id()).unwrap().songs[0].played);
        assert!(fx.session.view().entry(&jsid("a")).unwrap().played);
    }

    #[tokio::test]
    async fn edits_are_validated_before_submission() {
        let fx = fixture(vec![banger("a", 0, 1)], false);
        let patch = SongPatch {
            title: Some(String::new()),
            ..SongPatch::default()
        };

        assert!(matches!(
            fx.session.edit_song(&jsid("a"), patch).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let patch = SongPatch {
            kind: Some(SongKind::Ballad),
            ..SongPatch::default()
        };
        fx.session.edit_song(&jsid("a"), patch).await.unwrap();
        assert_eq!(
            fx.session.view().entry(&jsid("a")).unwrap().song.kind,
            SongKind::Ballad
        );
    }

    #[tokio::test]
    async fn adding_a_duplicate_warns_and_changes_nothing() {
        let mut fx = fixture(vec![banger("a", 2, 1)], false);
        let before = fx.session.view().store().version();

        let outcome = fx.session.add_song(&sid("a")).await.unwrap();

        assert_eq!(outcome, AddOutcome::AlreadyPresent);
        assert_eq!(fx.session.view().store().version(), before);
        let notices = drain(&mut fx.notices);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(notices[0].message, "\"A\" is already in the jam");
    }

    #[tokio::test(start_paused = true)]
    async fn added_song_is_voted_for_and_marked_as_new() {
        let fx = fixture(vec![banger("a", 0, 1)], false);
        fx.api.insert_song(banger("z", 0, 0).song);

        let AddOutcome::Added(id) = fx.session.add_song(&sid("z")).await.unwrap() else {
            panic!("song should be added");
        };

        let entry = fx.session.view().entry(&id).unwrap();
        assert_eq!(entry.votes, 1);
        assert_eq!(entry.highlight, Some(Highlight::Success));
        assert!(fx.session.has_voted(&id));
        assert_eq!(fx.api.jam(fx.session.jam_id()).unwrap().songs.len(), 2);
    }

    #[tokio::test]
    async fn unmount_tears_down_the_bridge_and_blocks_mutations() {
        let fx = fixture(vec![banger("a", 0, 1)], true);
        fx.session.unmount();

        assert!(!fx.session.view().is_mounted());
        assert!(fx.api.hub().active_channels().is_empty());
        assert!(matches!(
            fx.session.vote(&jsid("a"), VoteAction::Vote).await,
            Err(ServiceError::Unmounted)
        ));
        assert!(fx.session.lock_bridge().is_none());
    }

    #[tokio::test]
    async fn insertion_order_sort_keeps_stored_order() {
        let fx = fixture(vec![banger("a", 0, 1), banger("b", 0, 2)], false);
        fx.session.view().set_sort_method(SortMethod::Order);

        fx.session.vote(&jsid("b"), VoteAction::Vote).await.unwrap();
        assert_eq!(order(&fx.session), vec!["js-a", "js-b"]);
    }
}
