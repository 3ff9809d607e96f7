//! services/api/src/adapters/spotify_web.rs
//!
//! Track search and remote playback over the Spotify Web API.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use music_minds_core::domain::Song;
use music_minds_core::ports::{PlaybackService, PortError, PortResult, TrackCatalog};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    album: AlbumObject,
    duration_ms: i64,
    preview_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
    height: Option<u32>,
}

impl TrackObject {
    fn to_domain(self, now: DateTime<Utc>) -> Song {
        let release_year = release_year(&self.album.release_date).unwrap_or_else(|| now.year());
        let image_url = preferred_image(&self.album.images);
        let artist = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Song {
            id: Uuid::new_v4(),
            spotify_id: self.id,
            title: self.name,
            artist,
            album: self.album.name,
            release_year,
            duration_ms: self.duration_ms,
            genre: None,
            preview_url: self.preview_url,
            image_url,
            trivia: None,
            date_added: now,
        }
    }
}

/// The year from a `YYYY`, `YYYY-MM` or `YYYY-MM-DD` release date.
fn release_year(release_date: &str) -> Option<i32> {
    release_date.get(..4)?.parse().ok()
}

/// Prefers an image around 300px tall.
fn preferred_image(images: &[ImageObject]) -> Option<String> {
    let in_range = |lo: u32, hi: u32| {
        images
            .iter()
            .find(|i| i.height.is_some_and(|h| (lo..=hi).contains(&h)))
    };
    in_range(250, 350)
        .or_else(|| in_range(200, 400))
        .or_else(|| images.first())
        .map(|i| i.url.clone())
}

//=========================================================================================
// Adapter
//=========================================================================================

#[derive(Clone)]
pub struct SpotifyWebAdapter {
    http: Client,
    api_url: String,
}

impl SpotifyWebAdapter {
    pub fn new(http: Client, api_url: &str) -> Self {
        Self {
            http,
            api_url: api_url.to_string(),
        }
    }

    async fn send(&self, request: RequestBuilder, access_token: &str) -> PortResult<Response> {
        let response = request
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(PortError::Unauthorized),
            StatusCode::NOT_FOUND => Err(PortError::NotFound(
                "No active playback device".to_string(),
            )),
            status if !status.is_success() => {
                error!("Spotify Web API returned {}", status);
                Err(PortError::Transport(format!("Spotify returned {}", status)))
            }
            _ => Ok(response),
        }
    }

    async fn player(
        &self,
        access_token: &str,
        action: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, String)],
    ) -> PortResult<()> {
        let mut request = self
            .http
            .put(format!("{}/me/player/{}", self.api_url, action))
            .query(query);
        request = match body {
            Some(body) => request.json(&body),
            None => request.header(reqwest::header::CONTENT_LENGTH, "0"),
        };
        self.send(request, access_token).await?;
        debug!("Playback command '{}' accepted", action);
        Ok(())
    }
}

#[async_trait]
impl TrackCatalog for SpotifyWebAdapter {
    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> PortResult<Vec<Song>> {
        let request = self.http.get(format!("{}/search", self.api_url)).query(&[
            ("q", query.to_string()),
            ("type", "track".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        let body: SearchResponse = self
            .send(request, access_token)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed search response: {}", e)))?;

        let now = Utc::now();
        Ok(body
            .tracks
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .map(|track| track.to_domain(now))
            .collect())
    }
}

#[async_trait]
impl PlaybackService for SpotifyWebAdapter {
    async fn play(&self, access_token: &str, track_uri: &str) -> PortResult<()> {
        self.player(access_token, "play", Some(json!({ "uris": [track_uri] })), &[])
            .await
    }

    async fn pause(&self, access_token: &str) -> PortResult<()> {
        self.player(access_token, "pause", None, &[]).await
    }

    async fn resume(&self, access_token: &str) -> PortResult<()> {
        self.player(access_token, "play", None, &[]).await
    }

    async fn seek(&self, access_token: &str, position_ms: u64) -> PortResult<()> {
        self.player(
            access_token,
            "seek",
            None,
            &[("position_ms", position_ms.to_string())],
        )
        .await
    }
}
