use futures::future::BoxFuture;

use crate::dao::models::{Jam, JamId, JamSongId, Song, SongId, SongPatch};
use crate::dao::remote::RemoteResult;
use crate::dto::requests::{
    AddSongsResponse, CaptainSignupRequest, CreateJamRequest, NewSong, VoteAction,
};

/// Abstraction over the jam REST API.
pub trait JamApi: Send + Sync {
    /// `GET /jams`.
    fn list_jams(&self) -> BoxFuture<'static, RemoteResult<Vec<Jam>>>;
    /// `POST /jams`.
    fn create_jam(&self, request: CreateJamRequest) -> BoxFuture<'static, RemoteResult<Jam>>;
    /// `GET /jams/{id}` with populated songs.
    fn get_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<Jam>>;
    /// `DELETE /jams/{id}`.
    fn delete_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<()>>;
    /// `POST /jams/{id}/songs`; songs already present are reported as skipped.
    fn add_songs(
        &self,
        jam_id: JamId,
        song_ids: Vec<SongId>,
    ) -> BoxFuture<'static, RemoteResult<AddSongsResponse>>;
    /// `DELETE /jams/{id}/songs`, addressed by catalog song.
    fn remove_song(&self, jam_id: JamId, song_id: SongId) -> BoxFuture<'static, RemoteResult<()>>;
    /// `POST /jams/{id}/vote`.
    fn vote(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        action: VoteAction,
    ) -> BoxFuture<'static, RemoteResult<()>>;
    /// `POST /jams/{id}/played`; the server flips the flag.
    fn toggle_played(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
    ) -> BoxFuture<'static, RemoteResult<()>>;
    /// `POST /jams/{id}/captain`.
    fn add_captain(
        &self,
        jam_id: JamId,
        request: CaptainSignupRequest,
    ) -> BoxFuture<'static, RemoteResult<()>>;
    /// `DELETE /jams/{id}/captain`.
    fn remove_captain(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        name: String,
    ) -> BoxFuture<'static, RemoteResult<()>>;
    /// `GET /songs`.
    fn list_songs(&self) -> BoxFuture<'static, RemoteResult<Vec<Song>>>;
    /// `POST /songs`.
    fn create_song(&self, song: NewSong) -> BoxFuture<'static, RemoteResult<Song>>;
    /// `PUT /songs/{id}`; returns the stored song.
    fn update_song(&self, id: SongId, patch: SongPatch) -> BoxFuture<'static, RemoteResult<Song>>;
    /// `DELETE /songs/{id}`; also drops it from every jam.
    fn delete_song(&self, id: SongId) -> BoxFuture<'static, RemoteResult<()>>;
    /// `GET /songs/search?q=`.
    fn search_songs(&self, query: String) -> BoxFuture<'static, RemoteResult<Vec<Song>>>;
}
