//! Song catalog and jam directory: the list pages around a jam.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};
use validator::Validate;

use crate::{
    dao::{
        jam_api::JamApi,
        models::{Jam, JamId, Song, SongId, SongPatch},
    },
    dto::requests::{AddSongsRequest, AddSongsResponse, CreateJamRequest, NewSong},
    error::ServiceError,
    services::{
        notifications::Notifier,
        optimistic::{OptimisticExecutor, bounded},
    },
    state::VersionedStore,
};

/// Shortest query sent to the search endpoint.
pub const MIN_SEARCH_LEN: usize = 3;

fn songs_label(count: usize) -> &'static str {
    if count == 1 { "song" } else { "songs" }
}

/// Catalog of songs with optimistic edits and deletions.
pub struct SongCatalog {
    api: Arc<dyn JamApi>,
    executor: OptimisticExecutor<Vec<Song>>,
}

impl SongCatalog {
    /// Empty catalog; call `load` to fetch the songs.
    pub fn new(api: Arc<dyn JamApi>, notifier: Notifier, remote_timeout: Option<Duration>) -> Self {
        let store = Arc::new(VersionedStore::new(Vec::new()));
        Self {
            api,
            executor: OptimisticExecutor::new(store, notifier).with_timeout(remote_timeout),
        }
    }

    /// Songs currently held.
    pub fn songs(&self) -> Arc<Vec<Song>> {
        self.executor.store().value()
    }

    /// Replace the held list with the server's catalog.
    pub async fn load(&self) -> Result<usize, ServiceError> {
        let songs = self.executor.call(self.api.list_songs()).await?;
        let count = songs.len();
        self.executor.store().commit(|_| Some(songs));
        info!(count, "song catalog loaded");
        Ok(count)
    }

    /// Validate and create a song; it is appended once the server confirms.
    pub async fn create(&self, song: NewSong) -> Result<Song, ServiceError> {
        song.validate()?;
        match self.executor.call(self.api.create_song(song)).await {
            Ok(created) => {
                let appended = created.clone();
                self.executor.store().commit(move |songs| {
                    let mut next = songs.clone();
                    next.push(appended);
                    Some(next)
                });
                self.executor.notifier().success("Song created successfully");
                Ok(created)
            }
            Err(err) => {
                warn!(error = %err, "song creation failed");
                self.executor
                    .notifier()
                    .error(format!("Error creating song: {}", err.user_message()));
                Err(err)
            }
        }
    }

    /// Patch a song optimistically.
    pub async fn edit(&self, id: &SongId, patch: SongPatch) -> Result<Song, ServiceError> {
        patch.validate()?;
        let current = self
            .songs()
            .iter()
            .find(|song| &song.id == id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Song not found".into()))?;
        let inverse = patch.inverse_for(&current);

        let pending = self
            .executor
            .begin("updating song", |songs| Some(patch_songs(songs, id, &patch)))?;
        let inverse_id = id.clone();
        let pending = pending
            .with_compensation(move |songs: &Vec<Song>| {
                Some(patch_songs(songs, &inverse_id, &inverse))
            })
            .with_success("Song updated successfully");

        self.executor
            .run(pending, self.api.update_song(id.clone(), patch))
            .await
    }

    /// Delete a song optimistically; jams referencing it drop it server-side.
    pub async fn delete(&self, id: &SongId) -> Result<(), ServiceError> {
        let songs = self.songs();
        let (index, song) = songs
            .iter()
            .enumerate()
            .find(|(_, song)| &song.id == id)
            .map(|(index, song)| (index, song.clone()))
            .ok_or_else(|| ServiceError::NotFound("Song not found".into()))?;

        let pending = self
            .executor
            .begin("deleting song", |songs| {
                Some(songs.iter().filter(|song| &song.id != id).cloned().collect())
            })?
            .with_compensation(move |songs: &Vec<Song>| {
                if songs.iter().any(|existing| existing.id == song.id) {
                    return None;
                }
                let mut next = songs.clone();
                next.insert(index.min(next.len()), song);
                Some(next)
            })
            .with_success("Song deleted successfully");

        self.executor
            .run(pending, self.api.delete_song(id.clone()))
            .await
    }

    /// Autocomplete search; short queries return nothing without a request.
    pub async fn search(&self, query: &str) -> Result<Vec<Song>, ServiceError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        self.executor
            .call(self.api.search_songs(query.to_owned()))
            .await
    }
}

fn patch_songs(songs: &[Song], id: &SongId, patch: &SongPatch) -> Vec<Song> {
    songs
        .iter()
        .map(|song| {
            if &song.id == id {
                patch.apply_to(song)
            } else {
                song.clone()
            }
        })
        .collect()
}

/// List of jams plus the bulk add of catalog songs into one of them.
pub struct JamDirectory {
    api: Arc<dyn JamApi>,
    executor: OptimisticExecutor<Vec<Jam>>,
}

impl JamDirectory {
    /// Empty directory; call `load` to fetch the jams.
    pub fn new(api: Arc<dyn JamApi>, notifier: Notifier, remote_timeout: Option<Duration>) -> Self {
        let store = Arc::new(VersionedStore::new(Vec::new()));
        Self {
            api,
            executor: OptimisticExecutor::new(store, notifier).with_timeout(remote_timeout),
        }
    }

    /// Jams loaded so far.
    pub fn jams(&self) -> Arc<Vec<Jam>> {
        self.executor.store().value()
    }

    /// Fetch every jam; returns how many there are.
    pub async fn load(&self) -> Result<usize, ServiceError> {
        let jams = self.executor.call(self.api.list_jams()).await?;
        let count = jams.len();
        self.executor.store().commit(|_| Some(jams));
        info!(count, "jams loaded");
        Ok(count)
    }

    /// Validate and create a jam.
    pub async fn create(&self, request: CreateJamRequest) -> Result<Jam, ServiceError> {
        request.validate()?;
        match self.executor.call(self.api.create_jam(request)).await {
            Ok(jam) => {
                let inserted = jam.clone();
                self.executor.store().commit(move |jams| {
                    let mut next = jams.clone();
                    next.insert(0, inserted);
                    Some(next)
                });
                self.executor
                    .notifier()
                    .success(format!("Jam \"{}\" created", jam.name));
                Ok(jam)
            }
            Err(err) => {
                warn!(error = %err, "jam creation failed");
                self.executor
                    .notifier()
                    .error(format!("Error creating jam: {}", err.user_message()));
                Err(err)
            }
        }
    }

    /// Delete a jam optimistically.
    pub async fn delete(&self, id: &JamId) -> Result<(), ServiceError> {
        let jams = self.jams();
        let (index, jam) = jams
            .iter()
            .enumerate()
            .find(|(_, jam)| &jam.id == id)
            .map(|(index, jam)| (index, jam.clone()))
            .ok_or_else(|| ServiceError::NotFound("Jam not found".into()))?;

        let pending = self
            .executor
            .begin("deleting jam", |jams| {
                Some(jams.iter().filter(|jam| &jam.id != id).cloned().collect())
            })?
            .with_compensation(move |jams: &Vec<Jam>| {
                if jams.iter().any(|existing| existing.id == jam.id) {
                    return None;
                }
                let mut next = jams.clone();
                next.insert(index.min(next.len()), jam);
                Some(next)
            })
            .with_success("Jam deleted");

        self.executor
            .run(pending, self.api.delete_jam(id.clone()))
            .await
    }

    /// Add catalog songs to `jam_id`, reporting added and skipped counts.
    pub async fn add_songs(
        &self,
        jam_id: &JamId,
        song_ids: Vec<SongId>,
    ) -> Result<AddSongsResponse, ServiceError> {
        let request = AddSongsRequest { song_ids };
        request.validate()?;

        let outcome = bounded(
            self.executor.remote_timeout(),
            self.api.add_songs(jam_id.clone(), request.song_ids),
        )
        .await;
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(jam_id = %jam_id, error = %err, "adding songs failed");
                self.executor
                    .notifier()
                    .error(format!("Error adding songs: {}", err.user_message()));
                return Err(err);
            }
        };

        if let Some(jam) = &response.jam {
            let updated = jam.clone();
            self.executor.store().commit(move |jams| {
                let mut next = jams.clone();
                let slot = next.iter_mut().find(|existing| existing.id == updated.id)?;
                *slot = updated;
                Some(next)
            });
        }

        let notifier = self.executor.notifier();
        let added = response.added_songs.len();
        let skipped = response.skipped_songs.len();
        if added > 0 {
            let jam_name = response
                .jam
                .as_ref()
                .map(|jam| jam.name.clone())
                .unwrap_or_else(|| jam_id.to_string());
            notifier.success(format!("Added {added} {} to {jam_name}", songs_label(added)));
        }
        if skipped > 0 {
            let verb = if skipped == 1 { "was" } else { "were" };
            notifier.warning(format!(
                "{skipped} {} {verb} already in the jam",
                songs_label(skipped)
            ));
        }
        info!(jam_id = %jam_id, added, skipped, "songs added to jam");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::loopback::{LoopbackJamApi, Operation};
    use crate::dao::models::SongKind;
    use crate::dto::requests::InitialJamSong;
    use crate::services::notifications::{NoticeLevel, drain};
    use time::macros::datetime;

    fn new_song(title: &str) -> NewSong {
        NewSong {
            title: title.into(),
            artist: "Fleetwood Mac".into(),
            kind: SongKind::Ballad,
            tags: vec![],
            chord_chart: None,
        }
    }

    #[tokio::test]
    async fn catalog_edits_roll_back_on_failure() {
        let api = LoopbackJamApi::default();
        let catalog = SongCatalog::new(Arc::new(api.clone()), Notifier::disabled(), None);
        let song = catalog.create(new_song("Dreams")).await.unwrap();

        api.fail_next(Operation::UpdateSong);
        let patch = SongPatch {
            title: Some("Landslide".into()),
            ..SongPatch::default()
        };
        assert!(catalog.edit(&song.id, patch.clone()).await.is_err());
        assert_eq!(catalog.songs()[0].title, "Dreams");

        let updated = catalog.edit(&song.id, patch).await.unwrap();
        assert_eq!(updated.title, "Landslide");
        assert_eq!(catalog.songs()[0].title, "Landslide");
    }

    #[tokio::test]
    async fn catalog_validates_and_deletes() {
        let api = LoopbackJamApi::default();
        let catalog = SongCatalog::new(Arc::new(api.clone()), Notifier::disabled(), None);

        let mut invalid = new_song("Everywhere");
        invalid.chord_chart = Some("not a url".into());
        assert!(matches!(
            catalog.create(invalid).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let song = catalog.create(new_song("Everywhere")).await.unwrap();
        catalog.delete(&song.id).await.unwrap();
        assert!(catalog.songs().is_empty());
        assert_eq!(catalog.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn short_searches_skip_the_request() {
        let api = LoopbackJamApi::default();
        let catalog = SongCatalog::new(Arc::new(api.clone()), Notifier::disabled(), None);
        catalog.create(new_song("Rhiannon")).await.unwrap();

        api.fail_next(Operation::SearchSongs);
        assert!(catalog.search("rh").await.unwrap().is_empty());
        assert!(catalog.search("rhia").await.is_err());
        assert_eq!(catalog.search("FLEET").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_add_reports_added_and_skipped() {
        let api = LoopbackJamApi::default();
        let (notifier, mut notices) = Notifier::channel();
        let catalog = SongCatalog::new(Arc::new(api.clone()), Notifier::disabled(), None);
        let directory = JamDirectory::new(Arc::new(api.clone()), notifier, None);

        let first = catalog.create(new_song("Dreams")).await.unwrap();
        let second = catalog.create(new_song("Gypsy")).await.unwrap();
        let jam = directory
            .create(CreateJamRequest {
                name: "Friday".into(),
                jam_date: datetime!(2025-05-02 20:00 UTC),
                songs: vec![InitialJamSong {
                    song: first.id.clone(),
                }],
            })
            .await
            .unwrap();
        drain(&mut notices);

        let response = directory
            .add_songs(&jam.id, vec![first.id.clone(), second.id.clone()])
            .await
            .unwrap();

        assert_eq!(response.added_songs, vec![second.id]);
        assert_eq!(directory.jams()[0].songs.len(), 2);
        let notices = drain(&mut notices);
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert_eq!(notices[0].message, "Added 1 song to Friday");
        assert_eq!(notices[1].level, NoticeLevel::Warning);
        assert_eq!(notices[1].message, "1 song was already in the jam");

        assert!(matches!(
            directory.add_songs(&jam.id, Vec::new()).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn failed_jam_deletion_is_restored() {
        let api = LoopbackJamApi::default();
        let directory = JamDirectory::new(Arc::new(api.clone()), Notifier::disabled(), None);
        let jam = directory
            .create(CreateJamRequest {
                name: "Saturday".into(),
                jam_date: datetime!(2025-05-03 20:00 UTC),
                songs: vec![],
            })
            .await
            .unwrap();

        api.fail_next(Operation::DeleteJam);
        assert!(directory.delete(&jam.id).await.is_err());
        assert_eq!(directory.jams().len(), 1);

        directory.delete(&jam.id).await.unwrap();
        assert!(directory.jams().is_empty());
    }
}
