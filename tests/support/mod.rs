//! Fake jam server: the REST surface served by axum over a [`LoopbackJamApi`].

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tokio::{net::TcpListener, task::JoinHandle};

use jam_setlist::{
    dao::{
        jam_api::JamApi,
        loopback::LoopbackJamApi,
        models::{Jam, JamId, JamSongId, Song, SongId, SongPatch},
        remote::RemoteError,
    },
    dto::requests::{
        AddSongsRequest, AddSongsResponse, CaptainSignupRequest, CreateJamRequest, ErrorBody,
        NewSong, PlayedRequest, RemoveSongRequest, VoteRequest,
    },
};

/// Running fake server; aborted on drop.
pub struct TestServer {
    pub backend: LoopbackJamApi,
    pub base_url: String,
    task: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve `backend` on an ephemeral localhost port under `/api`.
pub async fn spawn(backend: LoopbackJamApi) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .nest("/api", router())
        .with_state(backend.clone());
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        backend,
        base_url: format!("http://{addr}/api"),
        task,
    }
}

fn router() -> Router<LoopbackJamApi> {
    Router::new()
        .route("/jams", get(list_jams).post(create_jam))
        .route("/jams/{id}", get(get_jam).delete(delete_jam))
        .route("/jams/{id}/songs", post(add_songs).delete(remove_song))
        .route("/jams/{id}/vote", post(vote))
        .route("/jams/{id}/played", post(toggle_played))
        .route("/jams/{id}/captain", post(add_captain).delete(remove_captain))
        .route("/songs", get(list_songs).post(create_song))
        .route("/songs/search", get(search_songs))
        .route("/songs/{id}", put(update_song).delete(delete_song))
}

struct Failure(RemoteError);

impl From<RemoteError> for Failure {
    fn from(err: RemoteError) -> Self {
        Failure(err)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let (status, error) = match self.0 {
            RemoteError::Invalid { message } => (StatusCode::BAD_REQUEST, message),
            RemoteError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            RemoteError::Unavailable { message, .. } => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

type Handled<T> = Result<T, Failure>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptainQuery {
    song_id: JamSongId,
    name: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn list_jams(State(api): State<LoopbackJamApi>) -> Handled<Json<Vec<Jam>>> {
    Ok(Json(api.list_jams().await?))
}

async fn create_jam(
    State(api): State<LoopbackJamApi>,
    Json(request): Json<CreateJamRequest>,
) -> Handled<(StatusCode, Json<Jam>)> {
    Ok((StatusCode::CREATED, Json(api.create_jam(request).await?)))
}

async fn get_jam(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
) -> Handled<Json<Jam>> {
    Ok(Json(api.get_jam(id).await?))
}

async fn delete_jam(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
) -> Handled<StatusCode> {
    api.delete_jam(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_songs(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Json(request): Json<AddSongsRequest>,
) -> Handled<Json<AddSongsResponse>> {
    Ok(Json(api.add_songs(id, request.song_ids).await?))
}

async fn remove_song(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Json(request): Json<RemoveSongRequest>,
) -> Handled<StatusCode> {
    api.remove_song(id, request.song_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn vote(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Json(request): Json<VoteRequest>,
) -> Handled<StatusCode> {
    api.vote(id, request.song_id, request.action).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_played(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Json(request): Json<PlayedRequest>,
) -> Handled<StatusCode> {
    api.toggle_played(id, request.song_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_captain(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Json(request): Json<CaptainSignupRequest>,
) -> Handled<StatusCode> {
    api.add_captain(id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_captain(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<JamId>,
    Query(query): Query<CaptainQuery>,
) -> Handled<StatusCode> {
    api.remove_captain(id, query.song_id, query.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_songs(State(api): State<LoopbackJamApi>) -> Handled<Json<Vec<Song>>> {
    Ok(Json(api.list_songs().await?))
}

async fn create_song(
    State(api): State<LoopbackJamApi>,
    Json(song): Json<NewSong>,
) -> Handled<(StatusCode, Json<Song>)> {
    Ok((StatusCode::CREATED, Json(api.create_song(song).await?)))
}

async fn update_song(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<SongId>,
    Json(patch): Json<SongPatch>,
) -> Handled<Json<Song>> {
    Ok(Json(api.update_song(id, patch).await?))
}

async fn delete_song(
    State(api): State<LoopbackJamApi>,
    Path(id): Path<SongId>,
) -> Handled<StatusCode> {
    api.delete_song(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_songs(
    State(api): State<LoopbackJamApi>,
    Query(query): Query<SearchQuery>,
) -> Handled<Json<Vec<Song>>> {
    Ok(Json(api.search_songs(query.q).await?))
}
