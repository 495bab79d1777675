//!
//! src/spotify.rs
//!
//! Spotify source: client credentials token plus the artist albums endpoint
//!

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::TrackerError;
use crate::fetch::{send_json, SpotifyClient};
use crate::sources::{finish_draft, ReleaseSource};
use crate::types::{
    ArtistConfig, Credential, LookbackWindow, Platform, ReleaseDraft, ReleaseRecord
};

/// Newest albums and singles inspected per artist
const ALBUM_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    id: String,
    name: String,
    #[serde(default)]
    album_type: Option<String>,
    release_date: String,
    #[serde(default)]
    release_date_precision: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Vec<Image>
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String
}

/// Spotify reports dates at day, month or year precision
fn parse_release_date(raw: &str, precision: Option<&str>) -> Option<NaiveDate> {
    let precision = precision.unwrap_or(match raw.len() {
        4 => "year",
        7 => "month",
        _ => "day"
    });

    match precision {
        "year" => raw.parse::<i32>().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        "month" => NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok(),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

pub struct SpotifySource {
    client: SpotifyClient,
    credential: Mutex<Option<Credential>>
}

impl SpotifySource {
    pub fn new(client: SpotifyClient) -> Self {
        Self { client, credential: Mutex::new(None) }
    }

    /// Reuses the cached token until its early expiry, then fetches another
    async fn bearer(&self) -> Result<String, TrackerError> {
        let mut cached = self.credential.lock().await;
        let now = Utc::now();
        if let Some(cred) = cached.as_ref().filter(|c| c.is_valid_at(now)) {
            return Ok(cred.token.clone());
        }

        let value = send_json(self.client.token_request()).await?;
        let token: TokenResponse = serde_json::from_value(value)?;
        let cred = Credential::from_expires_in(token.access_token, token.expires_in, now);
        info!(expires_at = %cred.expires_at, "spotify.token.refreshed");

        let bearer = cred.token.clone();
        *cached = Some(cred);
        Ok(bearer)
    }

    fn to_record(artist: &str, item: &serde_json::Value, window: &LookbackWindow) ->
        Option<ReleaseRecord> {
        let album: SpotifyAlbum = match serde_json::from_value(item.clone()) {
            Ok(a) => a,
            Err(e) => {
                warn!(artist = %artist, error = %e, "spotify.album.malformed");
                return None;
            }
        };

        let Some(release_date) = parse_release_date(
            &album.release_date,
            album.release_date_precision.as_deref()
        ) else {
            warn!(album = %album.id, raw = %album.release_date, "spotify.album.bad_date");
            return None;
        };

        if !window.admits_date(release_date) {
            return None;
        }

        let url = album.external_urls.spotify
            .unwrap_or_else(|| format!("https://open.spotify.com/album/{}", album.id));

        finish_draft(ReleaseDraft {
            platform: Platform::Spotify,
            source_id: album.id,
            artist: artist.to_string(),
            title: album.name,
            release_type: album.album_type.unwrap_or_else(|| "album".to_string()),
            url,
            image_url: album.images.into_iter().next().map(|i| i.url),
            album: None,
            release_date
        })
    }
}

#[async_trait]
impl ReleaseSource for SpotifySource {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn fetch_recent(
        &self,
        artist: &ArtistConfig,
        window: &LookbackWindow
    ) -> Result<Vec<ReleaseRecord>, TrackerError> {
        let Some(spotify_id) = artist.spotify_id.as_deref() else {
            return Ok(Vec::new());
        };

        let bearer = self.bearer().await?;
        let request = self.client.artist_albums(spotify_id, ALBUM_LIMIT, &bearer)?;
        let value = send_json(request).await?;

        let Some(items) = value["items"].as_array() else {
            return Err(TrackerError::Parse("spotify albums response has no items".to_string()));
        };

        let records: Vec<ReleaseRecord> = items.iter()
            .filter_map(|item| Self::to_record(&artist.name, item, window))
            .collect();

        debug!(artist = %artist.name, seen = items.len(), recent = records.len(), "spotify.fetched");
        Ok(records)
    }
}
