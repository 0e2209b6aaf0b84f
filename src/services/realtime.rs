use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info, warn};

use crate::{
    dao::models::JamSongId,
    dto::events::{
        CaptainEvent, ChannelMessage, EventKind, JamEvent, SongAddedEvent, SongEditedEvent,
        SongPlayedEvent, SongRemovedEvent, VoteEvent, channel_name,
    },
    services::{
        channels::{ConnectionState, PushTransport},
        notifications::Notifier,
    },
    state::{
        BridgeAction, BridgePhase, BridgeStateMachine, InvalidTransition, SharedView, reducer,
    },
};

/// Failures surfaced by the event bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge lifecycle does not allow the requested action.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// An event payload could not be decoded.
    #[error("malformed `{event}` payload")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

type Handler = Arc<dyn Fn(JamEvent) + Send + Sync>;

/// Outcome of routing one channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A bound handler consumed the event.
    Handled(EventKind),
    /// A jam event with no handler bound.
    Unbound(EventKind),
    /// Not a jam event.
    Unknown,
}

/// Explicit event-name to handler table.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<IndexMap<EventKind, Handler>>,
}

impl HandlerTable {
    /// Bind `handler` to `kind`, replacing any previous binding.
    pub fn bind<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(JamEvent) + Send + Sync + 'static,
    {
        self.lock().insert(kind, Arc::new(handler));
    }

    /// Remove the binding for `kind`; returns whether one existed.
    pub fn unbind(&self, kind: EventKind) -> bool {
        self.lock().shift_remove(&kind).is_some()
    }

    /// Remove every binding.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Kinds currently bound, in binding order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().keys().copied().collect()
    }

    /// Decode `message` and run its handler.
    pub fn dispatch(&self, message: &ChannelMessage) -> Result<Dispatch, BridgeError> {
        let Some(kind) = EventKind::from_name(&message.event) else {
            return Ok(Dispatch::Unknown);
        };
        let Some(handler) = self.lock().get(&kind).cloned() else {
            return Ok(Dispatch::Unbound(kind));
        };
        let event = JamEvent::decode(kind, &message.data).map_err(|source| BridgeError::Payload {
            event: kind.name(),
            source,
        })?;
        handler(event);
        Ok(Dispatch::Handled(kind))
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<EventKind, Handler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct BridgeInner {
    view: SharedView,
    transport: Arc<dyn PushTransport>,
    notifier: Notifier,
    channel: String,
    handlers: HandlerTable,
    machine: Mutex<BridgeStateMachine>,
    last_announced: Arc<Mutex<Option<JamSongId>>>,
}

impl BridgeInner {
    fn machine(&self) -> MutexGuard<'_, BridgeStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, message: ChannelMessage) {
        if let Err(err) = self.machine().apply(BridgeAction::Receive) {
            debug!(channel = %self.channel, event = %message.event, error = %err, "dropping event");
            return;
        }

        match self.handlers.dispatch(&message) {
            Ok(Dispatch::Handled(kind)) => {
                debug!(channel = %self.channel, event = kind.name(), "applied channel event")
            }
            Ok(Dispatch::Unbound(kind)) => {
                debug!(channel = %self.channel, event = kind.name(), "no handler bound")
            }
            Ok(Dispatch::Unknown) => {
                debug!(channel = %self.channel, event = %message.event, "ignoring unknown event")
            }
            Err(err) => warn!(
                channel = %self.channel,
                error = %err,
                source = ?std::error::Error::source(&err),
                "skipping channel event"
            ),
        }
    }

    fn bind_handlers(&self) {
        let view = Arc::clone(&self.view);
        let notifier = self.notifier.clone();
        let last_announced = Arc::clone(&self.last_announced);
        self.handlers.bind(EventKind::SongAdded, move |event| {
            if let JamEvent::SongAdded(SongAddedEvent { song }) = event {
                let announce = {
                    let mut last = last_announced
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    let repeat = last.as_ref() == Some(&song.id);
                    *last = Some(song.id.clone());
                    !repeat
                };
                if announce {
                    notifier.success(format!("{} was added to the jam", song.song.describe()));
                }
                view.apply(|songs| reducer::apply_addition(songs, &song));
            }
        });

        let view = Arc::clone(&self.view);
        self.handlers.bind(EventKind::Vote, move |event| {
            if let JamEvent::Vote(VoteEvent { song_id, votes }) = event {
                view.confirm_vote(&song_id, votes);
            }
        });

        let view = Arc::clone(&self.view);
        self.handlers.bind(EventKind::CaptainAdded, move |event| {
            if let JamEvent::CaptainAdded(CaptainEvent { song_id, captain }) = event {
                view.apply(|songs| reducer::apply_captain_added(songs, &song_id, &captain));
            }
        });

        let view = Arc::clone(&self.view);
        self.handlers.bind(EventKind::CaptainRemoved, move |event| {
            if let JamEvent::CaptainRemoved(CaptainEvent { song_id, captain }) = event {
                view.apply(|songs| reducer::apply_captain_removed(songs, &song_id, &captain));
            }
        });

        let view = Arc::clone(&self.view);
        self.handlers.bind(EventKind::SongPlayed, move |event| {
            if let JamEvent::SongPlayed(SongPlayedEvent { song_id, played }) = event {
                view.confirm_played(&song_id, played);
            }
        });

        let view = Arc::clone(&self.view);
        let notifier = self.notifier.clone();
        self.handlers.bind(EventKind::SongRemoved, move |event| {
            if let JamEvent::SongRemoved(payload) = event {
                if let Some(name) = removed_song_name(&view, &payload) {
                    notifier.error(format!("{name} was removed from the jam"));
                }
                view.apply(|songs| reducer::apply_removal(songs, &payload.song_id));
            }
        });

        let view = Arc::clone(&self.view);
        self.handlers.bind(EventKind::SongEdited, move |event| {
            if let JamEvent::SongEdited(SongEditedEvent {
                song_id,
                updated_song,
            }) = event
            {
                view.apply(|songs| reducer::apply_edit(songs, &song_id, &updated_song));
            }
        });
    }
}

fn removed_song_name(view: &SharedView, payload: &SongRemovedEvent) -> Option<String> {
    if let (Some(title), Some(artist)) = (&payload.song_title, &payload.song_artist) {
        return Some(format!("\"{title}\" by {artist}"));
    }
    let jam = view.jam();
    let local = jam
        .songs
        .iter()
        .find(|entry| entry.song.id == payload.song_id)?;
    let title = payload.song_title.as_ref().unwrap_or(&local.song.title);
    let artist = payload.song_artist.as_ref().unwrap_or(&local.song.artist);
    Some(format!("\"{title}\" by {artist}"))
}

/// Binds a jam view to its push channel and applies remote events through the reducer.
pub struct JamChannelBridge {
    inner: Arc<BridgeInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JamChannelBridge {
    /// Bridge for `view` over `transport`; nothing is bound until [`JamChannelBridge::mount`].
    pub fn new(view: SharedView, transport: Arc<dyn PushTransport>, notifier: Notifier) -> Self {
        let channel = channel_name(view.jam_id());
        Self {
            inner: Arc::new(BridgeInner {
                view,
                transport,
                notifier,
                channel,
                handlers: HandlerTable::default(),
                machine: Mutex::new(BridgeStateMachine::new()),
                last_announced: Arc::new(Mutex::new(None)),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the jam channel, bind every handler and start dispatching.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        inner.machine().apply(BridgeAction::Mount)?;

        inner.handlers.clear();
        inner.bind_handlers();
        let receiver = inner.transport.subscribe(&inner.channel);

        let dispatcher = {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let mut stream = BroadcastStream::new(receiver);
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(message) => inner.deliver(message),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(channel = %inner.channel, skipped, "channel lagged; events skipped")
                        }
                    }
                }
                debug!(channel = %inner.channel, "channel stream closed");
            })
        };

        let observer = {
            let mut state = inner.transport.connection_state();
            let channel = inner.channel.clone();
            tokio::spawn(async move {
                while state.changed().await.is_ok() {
                    let current = *state.borrow_and_update();
                    match current {
                        ConnectionState::Connected => info!(%channel, "push connection established"),
                        ConnectionState::Unavailable | ConnectionState::Disconnected => warn!(
                            %channel,
                            state = ?current,
                            "push connection lost; missed events are not replayed"
                        ),
                        _ => debug!(%channel, state = ?current, "push connection state changed"),
                    }
                }
            })
        };

        self.lock_tasks().extend([dispatcher, observer]);
        info!(
            jam_id = %inner.view.jam_id(),
            channel = %inner.channel,
            handlers = inner.handlers.kinds().len(),
            "subscribed to jam channel"
        );
        Ok(())
    }

    /// Unbind every handler, unsubscribe and stop background tasks.
    ///
    /// The view stays mounted; its owner closes it.
    pub fn unmount(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        inner.machine().apply(BridgeAction::Unmount)?;

        for kind in inner.handlers.kinds() {
            if inner.handlers.unbind(kind) {
                debug!(channel = %inner.channel, event = kind.name(), "unbound handler");
            }
        }
        inner.transport.unsubscribe(&inner.channel);
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        info!(channel = %inner.channel, "unsubscribed from jam channel");
        Ok(())
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> BridgePhase {
        self.inner.machine().phase()
    }

    /// Events delivered since mount.
    pub fn received(&self) -> u64 {
        self.inner.machine().received()
    }

    /// Event kinds with a bound handler.
    pub fn bound_events(&self) -> Vec<EventKind> {
        self.inner.handlers.kinds()
    }

    /// Channel this bridge listens on.
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JamChannelBridge {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::eventually;
    use super::*;
    use crate::dao::models::{Captain, CaptainRole, Highlight, Jam, JamId, JamSong, SongPatch};
    use crate::services::channels::LocalHub;
    use crate::services::notifications::{Notice, NoticeLevel, drain};
    use crate::state::reducer::fixtures::*;
    use crate::state::{JamView, ViewOptions};
    use time::macros::datetime;

    struct Fixture {
        hub: Arc<LocalHub>,
        view: SharedView,
        bridge: JamChannelBridge,
        notices: tokio::sync::mpsc::UnboundedReceiver<Notice>,
    }

    fn fixture(songs: Vec<JamSong>) -> Fixture {
        let hub = Arc::new(LocalHub::new(32));
        let view = JamView::new(
            Jam {
                id: JamId::from("jam-1"),
                name: "Sunday".into(),
                jam_date: datetime!(2025-06-01 18:00 UTC),
                created_at: None,
                songs,
            },
            ViewOptions::default(),
        );
        let (notifier, notices) = Notifier::channel();
        let transport: Arc<dyn PushTransport> = hub.clone();
        let bridge = JamChannelBridge::new(Arc::clone(&view), transport, notifier);
        bridge.mount().expect("mounts");
        Fixture {
            hub,
            view,
            bridge,
            notices,
        }
    }

    const CHANNEL: &str = "jam-jam-1";

    fn publish(hub: &LocalHub, event: JamEvent) {
        let message = event.to_message().expect("encodes");
        hub.publish(CHANNEL, message);
    }

    #[tokio::test]
    async fn remote_vote_is_applied_once() {
        let fx = fixture(vec![banger("a", 3, 1), banger("b", 1, 2)]);
        let vote = JamEvent::Vote(VoteEvent {
            song_id: jsid("b"),
            votes: 5,
        });
        publish(&fx.hub, vote.clone());
        publish(&fx.hub, vote);

        eventually(|| fx.bridge.received() == 2).await;
        let jam = fx.view.jam();
        assert_eq!(jam.songs[0].id, jsid("b"));
        assert_eq!(jam.songs[0].votes, 5);
        assert_eq!(fx.view.store().version(), 2);
        assert!(fx.view.confirmed_since(&jsid("b"), 1));
        assert!(jam.songs[0].show_rainbow_heart);
        assert_eq!(jam.songs[0].highlight, Some(Highlight::Warning));
    }

    #[tokio::test]
    async fn repeated_song_added_toasts_once() {
        let mut fx = fixture(vec![banger("a", 0, 1)]);
        let added = JamEvent::SongAdded(SongAddedEvent {
            song: ballad("n", 0, 2),
        });
        publish(&fx.hub, added.clone());
        publish(&fx.hub, added);

        eventually(|| fx.bridge.received() == 2).await;
        assert_eq!(fx.view.jam().songs.len(), 2);
        let notices = drain(&mut fx.notices);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, "\"N\" by Artist n was added to the jam");
    }

    #[tokio::test]
    async fn song_removed_names_the_local_copy_when_payload_is_bare() {
        let mut fx = fixture(vec![banger("a", 0, 1), banger("b", 0, 2)]);
        publish(
            &fx.hub,
            JamEvent::SongRemoved(SongRemovedEvent {
                song_id: sid("b"),
                song_title: None,
                song_artist: None,
            }),
        );

        eventually(|| fx.view.jam().songs.len() == 1).await;
        let notices = drain(&mut fx.notices);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].message, "\"B\" by Artist b was removed from the jam");
    }

    #[tokio::test]
    async fn captains_played_and_edits_flow_through_the_reducer() {
        let fx = fixture(vec![banger("a", 0, 1)]);
        let captain = Captain {
            name: "Ana".into(),
            role: CaptainRole::Piano,
            created_at: None,
        };
        publish(
            &fx.hub,
            JamEvent::CaptainAdded(CaptainEvent {
                song_id: jsid("a"),
                captain: captain.clone(),
            }),
        );
        publish(
            &fx.hub,
            JamEvent::SongPlayed(SongPlayedEvent {
                song_id: jsid("a"),
                played: true,
            }),
        );
        publish(
            &fx.hub,
            JamEvent::SongEdited(SongEditedEvent {
                song_id: sid("a"),
                updated_song: SongPatch {
                    title: Some("Renamed".into()),
                    ..SongPatch::default()
                },
            }),
        );

        eventually(|| fx.bridge.received() == 3).await;
        let entry = fx.view.entry(&jsid("a")).expect("present");
        assert_eq!(entry.captains, vec![captain.clone()]);
        assert!(entry.played);
        assert_eq!(entry.song.title, "Renamed");

        publish(
            &fx.hub,
            JamEvent::CaptainRemoved(CaptainEvent {
                song_id: jsid("a"),
                captain,
            }),
        );
        eventually(|| fx.view.entry(&jsid("a")).is_some_and(|e| e.captains.is_empty())).await;
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped_without_teardown() {
        let fx = fixture(vec![banger("a", 0, 1)]);
        fx.hub.publish(
            CHANNEL,
            ChannelMessage {
                event: "vote".into(),
                data: "{\"songId\":".into(),
            },
        );
        fx.hub.publish(
            CHANNEL,
            ChannelMessage {
                event: "pusher_internal:member_added".into(),
                data: "{}".into(),
            },
        );
        publish(
            &fx.hub,
            JamEvent::Vote(VoteEvent {
                song_id: jsid("a"),
                votes: 2,
            }),
        );

        eventually(|| fx.view.jam().songs[0].votes == 2).await;
        assert_eq!(fx.bridge.phase(), BridgePhase::Subscribed);
    }

    #[tokio::test]
    async fn unmount_unbinds_every_handler_and_unsubscribes() {
        let fx = fixture(vec![banger("a", 0, 1)]);
        assert_eq!(fx.bridge.bound_events(), EventKind::ALL.to_vec());
        assert_eq!(fx.hub.active_channels(), vec![CHANNEL.to_string()]);

        fx.bridge.unmount().expect("unmounts");
        assert!(fx.bridge.bound_events().is_empty());
        assert!(fx.hub.active_channels().is_empty());
        assert!(fx.view.is_mounted());
        assert_eq!(fx.bridge.phase(), BridgePhase::Unsubscribed);

        match fx.bridge.unmount() {
            Err(BridgeError::Transition(InvalidTransition { from, action })) => {
                assert_eq!(from, BridgePhase::Unsubscribed);
                assert_eq!(action, BridgeAction::Unmount);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dispatch_reports_unbound_and_unknown_events() {
        let table = HandlerTable::default();
        let message = ChannelMessage {
            event: "vote".into(),
            data: "{}".into(),
        };
        assert_eq!(
            table.dispatch(&message).expect("no decode attempted"),
            Dispatch::Unbound(EventKind::Vote)
        );
        let unknown = ChannelMessage {
            event: "pusher:pong".into(),
            data: "{}".into(),
        };
        assert_eq!(table.dispatch(&unknown).expect("ignored"), Dispatch::Unknown);

        table.bind(EventKind::Vote, |_| {});
        assert!(matches!(
            table.dispatch(&message),
            Err(BridgeError::Payload { event: "vote", .. })
        ));
        assert!(table.unbind(EventKind::Vote));
        assert!(!table.unbind(EventKind::Vote));
    }
}
