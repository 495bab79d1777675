//!
//! src/types.rs
//!
//! Value types shared by the sources, the ledger and the sink
//!

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Spotify,
    YouTube,
    Melon
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Spotify => "Spotify",
            Platform::YouTube => "YouTube",
            Platform::Melon   => "Melon"
        }
    }

    /// Prefix used when building dedup keys
    pub fn key_prefix(self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::YouTube => "youtube",
            Platform::Melon   => "melon"
        }
    }

    /// Platform named by the prefix of a dedup key, if any
    pub fn from_dedup_key(key: &str) -> Option<Self> {
        let (prefix, _) = key.split_once('_')?;
        [Platform::Spotify, Platform::YouTube, Platform::Melon]
            .into_iter()
            .find(|p| p.key_prefix() == prefix)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

///
/// A release observed on one platform. Built only through `ReleaseRecord::new`
/// so the dedup key always has the `{platform}_{source_id}` shape.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    platform: Platform,
    artist: String,
    title: String,
    release_type: String,
    url: String,
    image_url: Option<String>,
    album: Option<String>,
    release_date: NaiveDate,
    dedup_key: String
}

/// Everything a source knows about a release before it becomes a record
#[derive(Debug, Clone)]
pub struct ReleaseDraft {
    pub platform: Platform,
    pub source_id: String,
    pub artist: String,
    pub title: String,
    pub release_type: String,
    pub url: String,
    pub image_url: Option<String>,
    pub album: Option<String>,
    pub release_date: NaiveDate
}

impl ReleaseRecord {
    pub fn new(draft: ReleaseDraft) -> Result<Self, TrackerError> {
        let source_id = draft.source_id.trim();
        if source_id.is_empty() {
            return Err(TrackerError::Parse(format!(
                "{} release '{}' has no source id", draft.platform, draft.title
            )));
        }

        let dedup_key = format!("{}_{source_id}", draft.platform.key_prefix());
        Ok( Self {
            platform: draft.platform,
            artist: draft.artist,
            title: draft.title,
            release_type: draft.release_type,
            url: draft.url,
            image_url: draft.image_url,
            album: draft.album,
            release_date: draft.release_date,
            dedup_key
        })
    }

    pub fn platform(&self) -> Platform { self.platform }
    pub fn artist(&self) -> &str { &self.artist }
    pub fn title(&self) -> &str { &self.title }
    pub fn release_type(&self) -> &str { &self.release_type }
    pub fn url(&self) -> &str { &self.url }
    pub fn image_url(&self) -> Option<&str> { self.image_url.as_deref() }
    pub fn album(&self) -> Option<&str> { self.album.as_deref() }
    pub fn release_date(&self) -> NaiveDate { self.release_date }
    pub fn dedup_key(&self) -> &str { &self.dedup_key }
}

///
/// What the ledger remembers about an announced release. Older files carry
/// no platform and a naive `timestamp`; both still load.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(alias = "timestamp", deserialize_with = "utc_or_naive")]
    pub recorded_at: DateTime<Utc>
}

/// RFC 3339, or a timestamp without offset taken as UTC
fn utc_or_naive<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(serde::de::Error::custom)
}

///
/// One tracked artist as read from the artists file. Missing identifiers
/// mean the platform is skipped for this artist.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArtistConfig {
    pub name: String,
    #[serde(default)]
    pub spotify_id: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub youtube_channel_id: Vec<String>,
    #[serde(default)]
    pub melon_url: Option<String>
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>)
    }

    let ids = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids
    };
    Ok(ids.into_iter().filter(|id| !id.trim().is_empty()).collect())
}

/// Bearer token held by a credential-backed source
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>
}

impl Credential {
    /// Refresh this long before the provider's stated expiry
    pub const SAFETY_MARGIN_SECS: i64 = 300;

    pub fn from_expires_in(token: String, expires_in_secs: i64, now: DateTime<Utc>) -> Self {
        let lifetime = (expires_in_secs - Self::SAFETY_MARGIN_SECS).max(0);
        Self { token, expires_at: now + Duration::seconds(lifetime) }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

///
/// The span a source is queried over, anchored at the run's clock
///
#[derive(Debug, Clone, Copy)]
pub struct LookbackWindow {
    pub now: DateTime<Utc>,
    pub span: Duration
}

impl LookbackWindow {
    pub fn new(now: DateTime<Utc>, span: Duration) -> Self {
        Self { now, span }
    }

    /// Saturates at the earliest representable instant
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now.checked_sub_signed(self.span).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Day-granular sources compare against this date
    pub fn cutoff_date(&self) -> NaiveDate {
        self.cutoff().date_naive()
    }

    pub fn admits_date(&self, date: NaiveDate) -> bool {
        date >= self.cutoff_date()
    }

    pub fn admits_instant(&self, at: DateTime<Utc>) -> bool {
        at >= self.cutoff()
    }
}
