//!
//! src/config.rs
//!
//! Loads environment configuration and the tracked artist list
//!

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time;

use url::Url;

use crate::errors::TrackerError;
use crate::types::ArtistConfig;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Constants for a tracking run
pub const LEDGER_RETENTION_DAYS: i64 = 30;
pub const LOOKBACK_HOURS: i64 = 24;
pub const ARTIST_PACING_MS: u64 = 1000;
pub const DISPATCH_PACING_MS: u64 = 1000;
pub const MAX_RETENTION_DAYS: i64 = 3650;
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 366;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, TrackerError> {
    match env_optional(s) {
        Some(v) => Ok(v),
        None => Err(TrackerError::Config(format!("{s} was not set"))),
    }
}

/// Treats unset and blank variables the same
fn env_optional(s: &str) -> Option<String> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None
    }
}

fn env_or<T: FromStr>(s: &str, default: T) -> Result<T, TrackerError> {
    match env_optional(s) {
        Some(v) => v.trim().parse::<T>()
            .map_err(|_| TrackerError::Config(format!("{s} invalid: {v}"))),
        None => Ok(default)
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Parses an https url from the environment, falling back to `default`
fn env_url(s: &str, default: &str, expected_host: &str) -> Result<Url, TrackerError> {
    let raw = env_optional(s).unwrap_or_else(|| default.to_string());
    let url = Url::parse(&raw)
        .map_err(|e| TrackerError::Config(format!("{s} invalid {e}")))?;

    ensure_https(&url).map_err(TrackerError::Config)?;
    ensure_host(&url, expected_host).map_err(TrackerError::Config)?;
    Ok(url)
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url.as_str())
            .field("api_base", &self.api_base.as_str())
            .finish()
    }
}

/// Spotify is skipped entirely when neither credential is set
fn build_spotify() -> Result<Option<SpotifyConfig>, TrackerError> {
    let client_id     = env_optional("SPOTIFY_CLIENT_ID");
    let client_secret = env_optional("SPOTIFY_CLIENT_SECRET");

    let (client_id, client_secret) = match (client_id, client_secret) {
        (Some(id), Some(secret)) => (id, secret),
        (None, None) => return Ok(None),
        _ => return Err(TrackerError::Config(
            "SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together".to_string()
        ))
    };

    let token_url = env_url(
        "SPOTIFY_TOKEN_URL",
        "https://accounts.spotify.com/api/token",
        "accounts.spotify.com"
    )?;
    let mut api_base = env_url(
        "SPOTIFY_API_BASE",
        "https://api.spotify.com/v1/",
        "api.spotify.com"
    )?;
    ensure_trailing_slash(&mut api_base);

    Ok( Some(SpotifyConfig { client_id, client_secret, token_url, api_base }) )
}

///
/// Configuration for the YouTube data api
///
#[derive(Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    pub api_base: Url,
    pub max_results: u32
}

impl std::fmt::Debug for YouTubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .field("max_results", &self.max_results)
            .finish()
    }
}

fn build_youtube() -> Result<Option<YouTubeConfig>, TrackerError> {
    let Some(api_key) = env_optional("YOUTUBE_API_KEY") else {
        return Ok(None);
    };

    let mut api_base = env_url(
        "YOUTUBE_API_BASE",
        "https://www.googleapis.com/youtube/v3/",
        "www.googleapis.com"
    )?;
    ensure_trailing_slash(&mut api_base);

    Ok( Some(YouTubeConfig { api_key, api_base, max_results: 10 }) )
}

///
/// Configuration for scraping Melon artist listings
///
#[derive(Debug, Clone)]
pub struct MelonConfig {
    pub song_base: String,   // song detail page, songId is appended
    pub user_agent: String,
    pub accept_language: String,
    pub max_rows: usize      // newest rows inspected per artist
}

impl Default for MelonConfig {
    fn default() -> Self {
        Self {
            song_base: "https://www.melon.com/song/detail.htm".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            max_rows: 10
        }
    }
}

fn build_melon() -> Result<MelonConfig, TrackerError> {
    let mut melon = MelonConfig::default();
    if env_optional("MELON_SONG_BASE").is_some() {
        melon.song_base = env_url(
            "MELON_SONG_BASE",
            &melon.song_base,
            "www.melon.com"
        )?.to_string();
    }
    Ok(melon)
}

///
/// Configuration for the Discord webhook notifications are posted to
///
#[derive(Clone)]
pub struct DiscordConfig {
    pub webhook_url: Url,
    pub footer: String,
    pub color: u32
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("webhook_url", &"[REDACTED]")
            .field("footer", &self.footer)
            .field("color", &self.color)
            .finish()
    }
}

fn build_discord() -> Result<DiscordConfig, TrackerError> {
    let raw = env_check("DISCORD_WEBHOOK_URL")?;
    let webhook_url = Url::parse(&raw)
        .map_err(|e| TrackerError::Config(format!("DISCORD_WEBHOOK_URL invalid {e}")))?;
    ensure_https(&webhook_url).map_err(TrackerError::Config)?;

    Ok( DiscordConfig {
        webhook_url,
        footer: "Music Release Tracker".to_string(),
        color: 3447003
    })
}

///
/// Configuration for Http timeouts, pools, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS
        }
    }
}

///
/// Where the artist list and the release ledger live
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub artists_file: PathBuf,
    pub ledger_file: PathBuf
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            artists_file: PathBuf::from("artists.json"),
            ledger_file: PathBuf::from("tracked_releases.json")
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let defaults = PersistenceConfig::default();
    PersistenceConfig {
        artists_file: env_optional("ARTISTS_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.artists_file),
        ledger_file: env_optional("TRACKED_RELEASES_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.ledger_file)
    }
}

///
/// Policy knobs for one tracking run
///
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub retention: chrono::Duration,        // ledger entries older than this are pruned
    pub lookback: chrono::Duration,         // how far back sources are queried
    pub artist_pacing: time::Duration,      // pause between artists
    pub dispatch_pacing: time::Duration     // pause between sink submissions
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::days(LEDGER_RETENTION_DAYS),
            lookback: chrono::Duration::hours(LOOKBACK_HOURS),
            artist_pacing: time::Duration::from_millis(ARTIST_PACING_MS),
            dispatch_pacing: time::Duration::from_millis(DISPATCH_PACING_MS)
        }
    }
}

fn bounded_span(
    key: &str,
    value: i64,
    max: i64,
    to_span: fn(i64) -> Option<chrono::Duration>
) -> Result<chrono::Duration, TrackerError> {
    if !(1..=max).contains(&value) {
        return Err(TrackerError::Config(format!("{key} must be in 1..={max}, got {value}")));
    }
    to_span(value).ok_or_else(|| TrackerError::Config(format!("{key} out of range: {value}")))
}

fn build_tracking() -> Result<TrackingConfig, TrackerError> {
    let retention_days: i64  = env_or("LEDGER_RETENTION_DAYS", LEDGER_RETENTION_DAYS)?;
    let lookback_hours: i64  = env_or("LOOKBACK_HOURS", LOOKBACK_HOURS)?;
    let artist_ms: u64       = env_or("ARTIST_PACING_MS", ARTIST_PACING_MS)?;
    let dispatch_ms: u64     = env_or("DISPATCH_PACING_MS", DISPATCH_PACING_MS)?;

    Ok( TrackingConfig {
        retention: bounded_span("LEDGER_RETENTION_DAYS", retention_days,
            MAX_RETENTION_DAYS, chrono::Duration::try_days)?,
        lookback: bounded_span("LOOKBACK_HOURS", lookback_hours,
            MAX_LOOKBACK_HOURS, chrono::Duration::try_hours)?,
        artist_pacing: time::Duration::from_millis(artist_ms),
        dispatch_pacing: time::Duration::from_millis(dispatch_ms)
    })
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,release_tracker=debug,reqwest=warn".to_string(),
            include_file_line: true,
            include_target: true
        }
    }
}

///
/// AppConfig which holds everything a tracking run needs
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: Option<SpotifyConfig>,
    pub youtube: Option<YouTubeConfig>,
    pub melon: MelonConfig,
    pub discord: DiscordConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub tracking: TrackingConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, TrackerError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let youtube     = build_youtube()?;
    let melon       = build_melon()?;
    let discord     = build_discord()?;
    let http        = HttpConfig::default();
    let persistence = build_persistence();
    let tracking    = build_tracking()?;
    let logging     = LoggingConfig::default();

    Ok( AppConfig {
        spotify, youtube, melon, discord, http, persistence, tracking, logging
    } )
}

///
/// Reads the tracked artists. A missing file means there is nothing to track;
/// a file that does not parse is a configuration error.
///
pub fn load_artists(path: &Path) -> Result<Vec<ArtistConfig>, TrackerError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "artists.missing");
            return Ok(Vec::new());
        },
        Err(e) => return Err(e.into())
    };

    let artists: Vec<ArtistConfig> = serde_json::from_str(&data)
        .map_err(|e| TrackerError::Config(
            format!("artists file {} invalid: {e}", path.display())
        ))?;

    tracing::info!(path = %path.display(), count = artists.len(), "artists.loaded");
    Ok(artists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_and_host_checks() {
        let good = Url::parse("https://api.spotify.com/v1").unwrap();
        assert!(ensure_https(&good).is_ok());
        assert!(ensure_host(&good, "API.spotify.com").is_ok());

        let plain = Url::parse("http://api.spotify.com/v1").unwrap();
        assert!(ensure_https(&plain).is_err());
        assert!(ensure_host(&plain, "accounts.spotify.com").is_err());
    }

    #[test]
    fn trailing_slash_is_added_once() {
        let mut url = Url::parse("https://www.googleapis.com/youtube/v3").unwrap();
        ensure_trailing_slash(&mut url);
        ensure_trailing_slash(&mut url);
        assert_eq!(url.as_str(), "https://www.googleapis.com/youtube/v3/");
        assert_eq!(url.join("search").unwrap().path(), "/youtube/v3/search");
    }

    #[test]
    fn missing_artists_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let artists = load_artists(&dir.path().join("artists.json")).unwrap();
        assert!(artists.is_empty());
    }

    #[test]
    fn artists_file_is_parsed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artists.json");
        std::fs::write(&path, r#"[
            {"name": "Loopy", "melon_url": "https://www.melon.com/artist/song.htm?artistId=1908520"},
            {"name": "Other", "spotify_id": "abc", "youtube_channel_id": ["UC1", "UC2"]}
        ]"#).unwrap();

        let artists = load_artists(&path).unwrap();
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].name, "Loopy");
        assert!(artists[0].spotify_id.is_none());
        assert_eq!(artists[1].youtube_channel_id.len(), 2);
    }

    #[test]
    fn corrupt_artists_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artists.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_artists(&path), Err(TrackerError::Config(_))));
    }

    #[test]
    fn tracking_defaults() {
        let tracking = TrackingConfig::default();
        assert_eq!(tracking.retention, chrono::Duration::days(30));
        assert_eq!(tracking.lookback, chrono::Duration::hours(24));
        assert_eq!(tracking.artist_pacing, time::Duration::from_secs(1));
    }

    #[test]
    fn tracking_spans_are_bounded() {
        let days = chrono::Duration::try_days;
        assert_eq!(bounded_span("LEDGER_RETENTION_DAYS", 30, MAX_RETENTION_DAYS, days).unwrap(),
            chrono::Duration::days(30));
        assert!(matches!(bounded_span("LEDGER_RETENTION_DAYS", 0, MAX_RETENTION_DAYS, days),
            Err(TrackerError::Config(_))));

        let hours = chrono::Duration::try_hours;
        assert!(matches!(bounded_span("LOOKBACK_HOURS", 10_000_000_000, MAX_LOOKBACK_HOURS, hours),
            Err(TrackerError::Config(_))));
        assert!(bounded_span("LOOKBACK_HOURS", MAX_LOOKBACK_HOURS, MAX_LOOKBACK_HOURS, hours).is_ok());
    }
}
