//!
//! src/sink.rs
//!
//! Renders new releases into notifications and hands them to the sink
//! one at a time. A rejected notification never stops the others.
//!

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::errors::TrackerError;
use crate::fetch::DiscordClient;
use crate::pacing::RateGate;
use crate::types::{Platform, ReleaseRecord};

/// Sink-ready view of one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub platform: Platform,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub release_type: String,
    pub release_date: String,
    pub url: String,
    pub image_url: Option<String>
}

impl Notification {
    pub fn from_release(release: &ReleaseRecord) -> Self {
        Self {
            platform: release.platform(),
            artist: release.artist().to_string(),
            title: release.title().to_string(),
            album: release.album().map(str::to_string),
            release_type: release.release_type().to_string(),
            release_date: release.release_date().format("%Y-%m-%d").to_string(),
            url: release.url().to_string(),
            image_url: release.image_url().map(str::to_string)
        }
    }
}

/// Somewhere notifications can be delivered. `Err` means the message was rejected.
#[async_trait]
pub trait ReleaseSink: Send + Sync {
    async fn submit(&self, notification: &Notification) -> Result<(), TrackerError>;
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new()
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub struct DiscordWebhookSink {
    client: DiscordClient
}

impl DiscordWebhookSink {
    pub fn new(client: DiscordClient) -> Self {
        Self { client }
    }

    /// Discord webhook payload with a single embed
    pub fn payload(&self, n: &Notification, now: DateTime<Utc>) -> Value {
        let mut description = format!("**{}** - {}", n.artist, n.title);
        if let Some(album) = &n.album {
            description.push_str(&format!("\n{album}"));
        }

        let mut embed = json!({
            "title": format!("🎵 New {} Released!", title_case(&n.release_type)),
            "description": description,
            "color": self.client.cfg.color,
            "fields": [
                { "name": "Platform", "value": n.platform.as_str(), "inline": true },
                { "name": "Release Date", "value": n.release_date, "inline": true },
                { "name": "Listen Now", "value": format!("[Click Here]({})", n.url), "inline": false }
            ],
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Secs, true),
            "footer": { "text": self.client.cfg.footer }
        });

        if let (Some(image), Some(obj)) = (&n.image_url, embed.as_object_mut()) {
            obj.insert("thumbnail".to_string(), json!({ "url": image }));
        }

        json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl ReleaseSink for DiscordWebhookSink {
    async fn submit(&self, notification: &Notification) -> Result<(), TrackerError> {
        let payload = self.payload(notification, Utc::now());
        let resp = self.client.execute_webhook(&payload).send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(200).collect();
        Err(TrackerError::Sink(format!("webhook returned {status}: {body}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize
}

///
/// Submits one notification per release in order, pausing `pacing` between
/// submissions. Failures are logged and counted.
///
pub async fn dispatch(
    sink: &dyn ReleaseSink,
    releases: &[ReleaseRecord],
    pacing: Duration
) -> DispatchReport {
    let mut gate = RateGate::new(pacing);
    let mut report = DispatchReport::default();

    for release in releases {
        gate.wait().await;
        let notification = Notification::from_release(release);
        match sink.submit(&notification).await {
            Ok(()) => {
                report.sent += 1;
                info!(key = %release.dedup_key(), artist = %release.artist(),
                    title = %release.title(), "dispatch.sent");
            },
            Err(e) => {
                report.failed += 1;
                error!(key = %release.dedup_key(), error = %e, "dispatch.failed");
            }
        }
    }
    report
}
