//! In-process backend serving the jam API from memory and broadcasting on a [`LocalHub`].
//!
//! Used by the integration tests behind a fake HTTP server and handy for offline demos.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        jam_api::JamApi,
        models::{Captain, Jam, JamId, JamSong, JamSongId, Song, SongId, SongPatch},
        remote::{RemoteError, RemoteResult},
    },
    dto::{
        events::{
            CaptainEvent, EventKind, SongAddedEvent, SongEditedEvent, SongPlayedEvent,
            SongRemovedEvent, VoteEvent, channel_name,
        },
        requests::{AddSongsResponse, CaptainSignupRequest, CreateJamRequest, NewSong, VoteAction},
    },
    services::channels::LocalHub,
    state::reducer,
};

/// API operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`JamApi::list_jams`].
    ListJams,
    /// [`JamApi::create_jam`].
    CreateJam,
    /// [`JamApi::get_jam`].
    GetJam,
    /// [`JamApi::delete_jam`].
    DeleteJam,
    /// [`JamApi::add_songs`].
    AddSongs,
    /// [`JamApi::remove_song`].
    RemoveSong,
    /// [`JamApi::vote`].
    Vote,
    /// [`JamApi::toggle_played`].
    TogglePlayed,
    /// [`JamApi::add_captain`].
    AddCaptain,
    /// [`JamApi::remove_captain`].
    RemoveCaptain,
    /// [`JamApi::list_songs`].
    ListSongs,
    /// [`JamApi::create_song`].
    CreateSong,
    /// [`JamApi::update_song`].
    UpdateSong,
    /// [`JamApi::delete_song`].
    DeleteSong,
    /// [`JamApi::search_songs`].
    SearchSongs,
}

#[derive(Debug, Clone)]
enum Injected {
    Reject(String),
    Unavailable,
    Stall,
}

#[derive(Default)]
struct Backend {
    jams: IndexMap<JamId, Jam>,
    songs: IndexMap<SongId, Song>,
    failures: HashMap<Operation, Injected>,
    delays: HashMap<Operation, Duration>,
}

/// [`JamApi`] served from memory; every mutation is echoed on the hub like the real server does.
#[derive(Clone)]
pub struct LoopbackJamApi {
    backend: Arc<Mutex<Backend>>,
    hub: Arc<LocalHub>,
}

impl Default for LoopbackJamApi {
    fn default() -> Self {
        Self::new(Arc::new(LocalHub::default()))
    }
}

impl LoopbackJamApi {
    /// Backend publishing its events on `hub`.
    pub fn new(hub: Arc<LocalHub>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            hub,
        }
    }

    /// Hub carrying the jam channels.
    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.hub
    }

    /// Seed a catalog song.
    pub fn insert_song(&self, song: Song) {
        self.lock().songs.insert(song.id.clone(), song);
    }

    /// Seed a jam as-is.
    pub fn insert_jam(&self, jam: Jam) {
        self.lock().jams.insert(jam.id.clone(), jam);
    }

    /// Current server-side copy of a jam.
    pub fn jam(&self, id: &JamId) -> Option<Jam> {
        self.lock().jams.get(id).cloned()
    }

    /// Make the next call of `operation` fail with a rejection carrying `message`.
    pub fn reject_next(&self, operation: Operation, message: impl Into<String>) {
        self.lock()
            .failures
            .insert(operation, Injected::Reject(message.into()));
    }

    /// Make the next call of `operation` fail as if the server were unreachable.
    pub fn fail_next(&self, operation: Operation) {
        self.lock().failures.insert(operation, Injected::Unavailable);
    }

    /// Make the next call of `operation` never answer.
    pub fn stall_next(&self, operation: Operation) {
        self.lock().failures.insert(operation, Injected::Stall);
    }

    /// Hold the answer to the next call of `operation` for `delay`; its effects apply at once.
    pub fn delay_next(&self, operation: Operation, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, jam_id: &JamId, kind: EventKind, payload: &impl Serialize) {
        let delivered = self
            .hub
            .publish_json(&channel_name(jam_id), kind.name(), payload);
        debug!(jam_id = %jam_id, event = kind.name(), delivered, "loopback event published");
    }

    fn serve<T, F>(&self, operation: Operation, handle: F) -> BoxFuture<'static, RemoteResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&LoopbackJamApi, &mut Backend) -> RemoteResult<T>,
    {
        let (outcome, delay) = {
            let mut backend = self.lock();
            let delay = backend.delays.remove(&operation);
            let outcome = match backend.failures.remove(&operation) {
                Some(Injected::Reject(message)) => Err(RemoteError::invalid(message)),
                Some(Injected::Unavailable) => Err(RemoteError::unavailable(
                    format!("{operation:?} failed"),
                    io::Error::new(io::ErrorKind::ConnectionReset, "injected failure"),
                )),
                Some(Injected::Stall) => {
                    debug!(?operation, "loopback call stalled");
                    return Box::pin(future::pending());
                }
                None => handle(self, &mut backend),
            };
            (outcome, delay)
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn jam_mut<'a>(backend: &'a mut Backend, id: &JamId) -> RemoteResult<&'a mut Jam> {
    backend
        .jams
        .get_mut(id)
        .ok_or_else(|| RemoteError::not_found("Jam not found"))
}

fn entry_of<'a>(jam: &'a Jam, id: &JamSongId) -> RemoteResult<&'a JamSong> {
    jam.entry(id)
        .ok_or_else(|| RemoteError::not_found("Song not found in jam"))
}

fn next_order(jam: &Jam) -> u32 {
    jam.songs.iter().map(|entry| entry.order).max().unwrap_or(0) + 1
}

fn new_entry(song: Song, order: u32) -> JamSong {
    JamSong {
        id: JamSongId::new(new_id()),
        song,
        order,
        votes: 0,
        played: false,
        captains: Vec::new(),
        highlight: None,
        show_rainbow_heart: false,
    }
}

impl JamApi for LoopbackJamApi {
    fn list_jams(&self) -> BoxFuture<'static, RemoteResult<Vec<Jam>>> {
        self.serve(Operation::ListJams, |_, backend| {
            let mut jams: Vec<Jam> = backend.jams.values().cloned().collect();
            jams.sort_by(|a, b| b.jam_date.cmp(&a.jam_date));
            Ok(jams)
        })
    }

    fn create_jam(&self, request: CreateJamRequest) -> BoxFuture<'static, RemoteResult<Jam>> {
        self.serve(Operation::CreateJam, |_, backend| {
            let mut songs = Vec::with_capacity(request.songs.len());
            for (index, initial) in request.songs.iter().enumerate() {
                let song = backend
                    .songs
                    .get(&initial.song)
                    .cloned()
                    .ok_or_else(|| RemoteError::invalid(format!("Unknown song {}", initial.song)))?;
                songs.push(new_entry(song, index as u32 + 1));
            }
            let jam = Jam {
                id: JamId::new(new_id()),
                name: request.name,
                jam_date: request.jam_date,
                created_at: Some(OffsetDateTime::now_utc()),
                songs,
            };
            backend.jams.insert(jam.id.clone(), jam.clone());
            Ok(jam)
        })
    }

    fn get_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<Jam>> {
        self.serve(Operation::GetJam, move |_, backend| {
            jam_mut(backend, &id).map(|jam| jam.clone())
        })
    }

    fn delete_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::DeleteJam, move |_, backend| {
            backend
                .jams
                .shift_remove(&id)
                .map(|_| ())
                .ok_or_else(|| RemoteError::not_found("Jam not found"))
        })
    }

    fn add_songs(
        &self,
        jam_id: JamId,
        song_ids: Vec<SongId>,
    ) -> BoxFuture<'static, RemoteResult<AddSongsResponse>> {
        self.serve(Operation::AddSongs, move |api, backend| {
            let catalog = backend.songs.clone();
            let jam = jam_mut(backend, &jam_id)?;

            let mut added = Vec::new();
            let mut skipped = Vec::new();
            for song_id in song_ids {
                if jam.songs.iter().any(|entry| entry.song.id == song_id) {
                    skipped.push(song_id);
                    continue;
                }
                let song = catalog
                    .get(&song_id)
                    .cloned()
                    .ok_or_else(|| RemoteError::not_found("Song not found"))?;
                let entry = new_entry(song, next_order(jam));
                jam.songs.push(entry.clone());
                api.publish(&jam_id, EventKind::SongAdded, &SongAddedEvent { song: entry });
                added.push(song_id);
            }

            let message = (!skipped.is_empty())
                .then(|| format!("{} song(s) already in jam", skipped.len()));
            Ok(AddSongsResponse {
                jam: Some(jam.clone()),
                added_songs: added,
                skipped_songs: skipped,
                message,
            })
        })
    }

    fn remove_song(&self, jam_id: JamId, song_id: SongId) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::RemoveSong, move |api, backend| {
            let jam = jam_mut(backend, &jam_id)?;
            let removed = jam
                .songs
                .iter()
                .find(|entry| entry.song.id == song_id)
                .map(|entry| entry.song.clone())
                .ok_or_else(|| RemoteError::not_found("Song not found in jam"))?;
            jam.songs = reducer::apply_removal(&jam.songs, &song_id);
            api.publish(
                &jam_id,
                EventKind::SongRemoved,
                &SongRemovedEvent {
                    song_id,
                    song_title: Some(removed.title),
                    song_artist: Some(removed.artist),
                },
            );
            Ok(())
        })
    }

    fn vote(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        action: VoteAction,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::Vote, move |api, backend| {
            let jam = jam_mut(backend, &jam_id)?;
            let votes = (entry_of(jam, &jam_song_id)?.votes + action.delta()).max(0);
            jam.songs = reducer::apply_vote_count(&jam.songs, &jam_song_id, votes);
            api.publish(
                &jam_id,
                EventKind::Vote,
                &VoteEvent {
                    song_id: jam_song_id,
                    votes,
                },
            );
            Ok(())
        })
    }

    fn toggle_played(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::TogglePlayed, move |api, backend| {
            let jam = jam_mut(backend, &jam_id)?;
            let played = !entry_of(jam, &jam_song_id)?.played;
            jam.songs = reducer::apply_played(&jam.songs, &jam_song_id, played);
            api.publish(
                &jam_id,
                EventKind::SongPlayed,
                &SongPlayedEvent {
                    song_id: jam_song_id,
                    played,
                },
            );
            Ok(())
        })
    }

    fn add_captain(
        &self,
        jam_id: JamId,
        request: CaptainSignupRequest,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::AddCaptain, move |api, backend| {
            let jam = jam_mut(backend, &jam_id)?;
            let captain = Captain {
                name: request.name.trim().to_owned(),
                role: request.role,
                created_at: Some(OffsetDateTime::now_utc()),
            };
            let entry = entry_of(jam, &request.song_id)?;
            if entry.captains.iter().any(|existing| existing.same_signup(&captain)) {
                return Err(RemoteError::invalid("Already signed up as captain"));
            }
            jam.songs = reducer::apply_captain_added(&jam.songs, &request.song_id, &captain);
            api.publish(
                &jam_id,
                EventKind::CaptainAdded,
                &CaptainEvent {
                    song_id: request.song_id,
                    captain,
                },
            );
            Ok(())
        })
    }

    fn remove_captain(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        name: String,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::RemoveCaptain, move |api, backend| {
            let jam = jam_mut(backend, &jam_id)?;
            let removed: Vec<Captain> = entry_of(jam, &jam_song_id)?
                .captains
                .iter()
                .filter(|captain| captain.name == name)
                .cloned()
                .collect();
            if removed.is_empty() {
                return Err(RemoteError::not_found("Captain not found"));
            }
            for captain in removed {
                jam.songs = reducer::apply_captain_removed(&jam.songs, &jam_song_id, &captain);
                api.publish(
                    &jam_id,
                    EventKind::CaptainRemoved,
                    &CaptainEvent {
                        song_id: jam_song_id.clone(),
                        captain,
                    },
                );
            }
            Ok(())
        })
    }

    fn list_songs(&self) -> BoxFuture<'static, RemoteResult<Vec<Song>>> {
        self.serve(Operation::ListSongs, |_, backend| {
            Ok(backend.songs.values().cloned().collect())
        })
    }

    fn create_song(&self, song: NewSong) -> BoxFuture<'static, RemoteResult<Song>> {
        self.serve(Operation::CreateSong, move |_, backend| {
            let duplicate = backend.songs.values().any(|existing| {
                existing.title.eq_ignore_ascii_case(&song.title)
                    && existing.artist.eq_ignore_ascii_case(&song.artist)
            });
            if duplicate {
                return Err(RemoteError::invalid("Song already exists"));
            }
            let created = Song {
                id: SongId::new(new_id()),
                title: song.title,
                artist: song.artist,
                kind: song.kind,
                tags: song.tags,
                chord_chart: song.chord_chart,
                times_played: 0,
                last_played: None,
            };
            backend.songs.insert(created.id.clone(), created.clone());
            Ok(created)
        })
    }

    fn update_song(&self, id: SongId, patch: SongPatch) -> BoxFuture<'static, RemoteResult<Song>> {
        self.serve(Operation::UpdateSong, move |api, backend| {
            let song = backend
                .songs
                .get_mut(&id)
                .ok_or_else(|| RemoteError::not_found("Song not found"))?;
            *song = patch.apply_to(song);
            let updated = song.clone();

            for jam in backend.jams.values_mut() {
                if jam.songs.iter().any(|entry| entry.song.id == id) {
                    jam.songs = reducer::apply_edit(&jam.songs, &id, &patch);
                    api.publish(
                        &jam.id,
                        EventKind::SongEdited,
                        &SongEditedEvent {
                            song_id: id.clone(),
                            updated_song: patch.clone(),
                        },
                    );
                }
            }
            Ok(updated)
        })
    }

    fn delete_song(&self, id: SongId) -> BoxFuture<'static, RemoteResult<()>> {
        self.serve(Operation::DeleteSong, move |api, backend| {
            backend
                .songs
                .shift_remove(&id)
                .ok_or_else(|| RemoteError::not_found("Song not found"))?;

            for jam in backend.jams.values_mut() {
                let remaining = reducer::apply_removal(&jam.songs, &id);
                if remaining.len() != jam.songs.len() {
                    jam.songs = remaining;
                    api.publish(
                        &jam.id,
                        EventKind::SongRemoved,
                        &SongRemovedEvent {
                            song_id: id.clone(),
                            song_title: None,
                            song_artist: None,
                        },
                    );
                }
            }
            Ok(())
        })
    }

    fn search_songs(&self, query: String) -> BoxFuture<'static, RemoteResult<Vec<Song>>> {
        self.serve(Operation::SearchSongs, move |_, backend| {
            let needle = query.to_lowercase();
            Ok(backend
                .songs
                .values()
                .filter(|song| {
                    song.title.to_lowercase().contains(&needle)
                        || song.artist.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect())
        })
    }
}
