//!
//! src/youtube.rs
//!
//! YouTube source: recent uploads of each configured channel via the search api
//!

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::TrackerError;
use crate::fetch::{send_json, YouTubeClient};
use crate::sources::{finish_draft, ReleaseSource};
use crate::types::{ArtistConfig, LookbackWindow, Platform, ReleaseDraft, ReleaseRecord};

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    video_id: String
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: Thumbnails
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String
}

/// The search api html-escapes titles
fn unescape_title(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub struct YouTubeSource {
    client: YouTubeClient
}

impl YouTubeSource {
    pub fn new(client: YouTubeClient) -> Self {
        Self { client }
    }

    async fn fetch_channel(
        &self,
        artist: &str,
        channel_id: &str,
        window: &LookbackWindow
    ) -> Result<Vec<ReleaseRecord>, TrackerError> {
        let published_after = window.cutoff().to_rfc3339_opts(SecondsFormat::Secs, true);
        let request = self.client.channel_uploads(channel_id, &published_after)?;
        let value = send_json(request).await?;

        let Some(items) = value["items"].as_array() else {
            return Err(TrackerError::Parse(
                format!("youtube search for {channel_id} has no items")
            ));
        };

        let records = items.iter()
            .filter_map(|item| Self::to_record(artist, item, window))
            .collect();
        Ok(records)
    }

    fn to_record(artist: &str, item: &serde_json::Value, window: &LookbackWindow) ->
        Option<ReleaseRecord> {
        let item: SearchItem = match serde_json::from_value(item.clone()) {
            Ok(i) => i,
            Err(e) => {
                warn!(artist = %artist, error = %e, "youtube.item.malformed");
                return None;
            }
        };

        if !window.admits_instant(item.snippet.published_at) {
            return None;
        }

        let thumbnails = item.snippet.thumbnails;
        let image_url = thumbnails.high
            .or(thumbnails.medium)
            .or(thumbnails.default)
            .map(|t| t.url);

        finish_draft(ReleaseDraft {
            platform: Platform::YouTube,
            url: format!("https://www.youtube.com/watch?v={}", item.id.video_id),
            source_id: item.id.video_id,
            artist: artist.to_string(),
            title: unescape_title(&item.snippet.title),
            release_type: "video".to_string(),
            image_url,
            album: None,
            release_date: item.snippet.published_at.date_naive()
        })
    }
}

#[async_trait]
impl ReleaseSource for YouTubeSource {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    /// Channels are queried in order; the pair only fails if every channel did
    async fn fetch_recent(
        &self,
        artist: &ArtistConfig,
        window: &LookbackWindow
    ) -> Result<Vec<ReleaseRecord>, TrackerError> {
        let mut records = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0_usize;

        for channel_id in &artist.youtube_channel_id {
            match self.fetch_channel(&artist.name, channel_id, window).await {
                Ok(found) => {
                    debug!(artist = %artist.name, channel = %channel_id,
                        recent = found.len(), "youtube.fetched");
                    succeeded += 1;
                    records.extend(found);
                },
                Err(e) => {
                    warn!(artist = %artist.name, channel = %channel_id,
                        error = %e, "youtube.channel.failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(records)
        }
    }
}
