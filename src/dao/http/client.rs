use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::dao::{
    jam_api::JamApi,
    models::{Jam, JamId, JamSongId, Song, SongId, SongPatch},
    remote::RemoteResult,
};
use crate::dto::requests::{
    AddSongsRequest, AddSongsResponse, CaptainSignupRequest, CreateJamRequest, ErrorBody,
    NewSong, PlayedRequest, RemoveSongRequest, VoteAction, VoteRequest,
};

use super::{
    config::HttpApiConfig,
    error::{HttpApiError, HttpResult},
};

/// `reqwest` implementation of [`JamApi`].
#[derive(Clone)]
pub struct HttpJamApi {
    client: Client,
    base_url: Arc<str>,
}

impl HttpJamApi {
    /// Build the HTTP client for the configured API.
    pub fn connect(config: HttpApiConfig) -> HttpResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|source| HttpApiError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
        })
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client.request(method, url)
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> HttpResult<Response> {
        debug!(path, "sending API request");
        let response = builder
            .send()
            .await
            .map_err(|source| HttpApiError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        Err(HttpApiError::RequestStatus {
            path: path.to_string(),
            status,
            message,
        })
    }

    async fn fetch<T>(&self, builder: RequestBuilder, path: &str) -> HttpResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(builder, path).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| HttpApiError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> HttpResult<()> {
        self.send(builder, path).await.map(|_| ())
    }
}

impl JamApi for HttpJamApi {
    fn list_jams(&self) -> BoxFuture<'static, RemoteResult<Vec<Jam>>> {
        let api = self.clone();
        Box::pin(async move {
            let path = "jams";
            Ok(api.fetch(api.request(Method::GET, path), path).await?)
        })
    }

    fn create_jam(&self, request: CreateJamRequest) -> BoxFuture<'static, RemoteResult<Jam>> {
        let api = self.clone();
        Box::pin(async move {
            let path = "jams";
            let builder = api.request(Method::POST, path).json(&request);
            Ok(api.fetch(builder, path).await?)
        })
    }

    fn get_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<Jam>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{id}");
            Ok(api.fetch(api.request(Method::GET, &path), &path).await?)
        })
    }

    fn delete_jam(&self, id: JamId) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{id}");
            Ok(api.execute(api.request(Method::DELETE, &path), &path).await?)
        })
    }

    fn add_songs(
        &self,
        jam_id: JamId,
        song_ids: Vec<SongId>,
    ) -> BoxFuture<'static, RemoteResult<AddSongsResponse>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/songs");
            let builder = api
                .request(Method::POST, &path)
                .json(&AddSongsRequest { song_ids });
            Ok(api.fetch(builder, &path).await?)
        })
    }

    fn remove_song(&self, jam_id: JamId, song_id: SongId) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/songs");
            let builder = api
                .request(Method::DELETE, &path)
                .json(&RemoveSongRequest { song_id });
            Ok(api.execute(builder, &path).await?)
        })
    }

    fn vote(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        action: VoteAction,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/vote");
            let builder = api.request(Method::POST, &path).json(&VoteRequest {
                song_id: jam_song_id,
                action,
            });
            Ok(api.execute(builder, &path).await?)
        })
    }

    fn toggle_played(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/played");
            let builder = api.request(Method::POST, &path).json(&PlayedRequest {
                song_id: jam_song_id,
            });
            Ok(api.execute(builder, &path).await?)
        })
    }

    fn add_captain(
        &self,
        jam_id: JamId,
        request: CaptainSignupRequest,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/captain");
            let builder = api.request(Method::POST, &path).json(&request);
            Ok(api.execute(builder, &path).await?)
        })
    }

    fn remove_captain(
        &self,
        jam_id: JamId,
        jam_song_id: JamSongId,
        name: String,
    ) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("jams/{jam_id}/captain");
            let builder = api
                .request(Method::DELETE, &path)
                .query(&[("songId", jam_song_id.as_str()), ("name", name.as_str())]);
            Ok(api.execute(builder, &path).await?)
        })
    }

    fn list_songs(&self) -> BoxFuture<'static, RemoteResult<Vec<Song>>> {
        let api = self.clone();
        Box::pin(async move {
            let path = "songs";
            Ok(api.fetch(api.request(Method::GET, path), path).await?)
        })
    }

    fn create_song(&self, song: NewSong) -> BoxFuture<'static, RemoteResult<Song>> {
        let api = self.clone();
        Box::pin(async move {
            let path = "songs";
            let builder = api.request(Method::POST, path).json(&song);
            Ok(api.fetch(builder, path).await?)
        })
    }

    fn update_song(&self, id: SongId, patch: SongPatch) -> BoxFuture<'static, RemoteResult<Song>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("songs/{id}");
            let builder = api.request(Method::PUT, &path).json(&patch);
            Ok(api.fetch(builder, &path).await?)
        })
    }

    fn delete_song(&self, id: SongId) -> BoxFuture<'static, RemoteResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let path = format!("songs/{id}");
            Ok(api.execute(api.request(Method::DELETE, &path), &path).await?)
        })
    }

    fn search_songs(&self, query: String) -> BoxFuture<'static, RemoteResult<Vec<Song>>> {
        let api = self.clone();
        Box::pin(async move {
            let path = "songs/search";
            let builder = api
                .request(Method::GET, path)
                .query(&[("q", query.as_str())]);
            Ok(api.fetch(builder, path).await?)
        })
    }
}
