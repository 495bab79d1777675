//!
//! src/ledger.rs
//!
//! Persisted record of every release already announced, keyed by dedup key,
//! with age based eviction so the file stays bounded
//!

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::errors::TrackerError;
use crate::types::{LedgerEntry, Platform, ReleaseRecord};

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>
}

impl Ledger {
    /// An empty ledger that will be written to `path`
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), entries: HashMap::new() }
    }

    ///
    /// Reads the ledger at `path`. A missing file is an empty ledger; a file
    /// that cannot be read or parsed is an error, since treating it as empty
    /// would announce every release again.
    ///
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "ledger.missing");
                return Ok(Self::empty(path));
            },
            Err(e) => return Err(TrackerError::Ledger(
                format!("read {}: {e}", path.display())
            ))
        };

        let mut entries: HashMap<String, LedgerEntry> = serde_json::from_str(&data)
            .map_err(|e| TrackerError::Ledger(
                format!("corrupt ledger {}: {e}", path.display())
            ))?;
        for (key, entry) in entries.iter_mut() {
            if entry.platform.is_none() {
                entry.platform = Platform::from_dedup_key(key);
            }
        }

        info!(path = %path.display(), entries = entries.len(), "ledger.loaded");
        Ok( Self { path: path.to_path_buf(), entries } )
    }

    pub fn contains(&self, dedup_key: &str) -> bool {
        self.entries.contains_key(dedup_key)
    }

    #[cfg(test)]
    pub fn get(&self, dedup_key: &str) -> Option<&LedgerEntry> {
        self.entries.get(dedup_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks a release as announced at `now`, replacing any earlier entry
    pub fn record(&mut self, release: &ReleaseRecord, now: DateTime<Utc>) {
        let entry = LedgerEntry {
            artist: release.artist().to_string(),
            title: release.title().to_string(),
            platform: Some(release.platform()),
            recorded_at: now
        };
        self.entries.insert(release.dedup_key().to_string(), entry);
    }

    /// Drops entries recorded more than `retention` before `now`
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = now - entry.recorded_at <= retention;
            if !keep {
                debug!(key = %key, recorded_at = %entry.recorded_at, "ledger.evict");
            }
            keep
        });
        before - self.entries.len()
    }

    ///
    /// Writes the whole mapping to a temp file beside the ledger and renames
    /// it into place, so a crash leaves either the old or the new file.
    ///
    pub fn save(&self) -> Result<(), TrackerError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new(".")
        };
        std::fs::create_dir_all(parent).map_err(|e| TrackerError::Ledger(
            format!("create dir {}: {e}", parent.display())
        ))?;

        // sorted so successive files diff cleanly
        let sorted: BTreeMap<&String, &LedgerEntry> = self.entries.iter().collect();
        let data = serde_json::to_vec_pretty(&sorted)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| TrackerError::Ledger(
                format!("tempfile in {}: {e}", parent.display())
            ))?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e|
            TrackerError::Ledger(format!("persist {}: {e}", self.path.display())))?;

        info!(path = %self.path.display(), entries = self.entries.len(), "ledger.saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use crate::types::ReleaseDraft;

    fn release(platform: Platform, id: &str) -> ReleaseRecord {
        ReleaseRecord::new(ReleaseDraft {
            platform,
            source_id: id.to_string(),
            artist: "X".to_string(),
            title: format!("title {id}"),
            release_type: "single".to_string(),
            url: "https://example.com".to_string(),
            image_url: None,
            album: None,
            release_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        }).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(dir.path().join("tracked_releases.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked_releases.json");
        std::fs::write(&path, "{\"spotify_a\": {\"artist\": ").unwrap();

        assert!(matches!(Ledger::load(&path), Err(TrackerError::Ledger(_))));
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tracked_releases.json");

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.record(&release(Platform::Spotify, "abc123"), t0());
        ledger.record(&release(Platform::Melon, "77"), t0() + Duration::hours(1));
        ledger.save().unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);

        let entry = reloaded.get("spotify_abc123").unwrap();
        assert_eq!(entry.artist, "X");
        assert_eq!(entry.title, "title abc123");
        assert_eq!(entry.platform, Some(Platform::Spotify));
        assert_eq!(entry.recorded_at, t0());
        assert!(reloaded.contains("melon_77"));
    }

    #[test]
    fn cron_era_file_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked_releases.json");
        std::fs::write(&path, r#"{
            "spotify_abc": {"artist": "X", "title": "T", "timestamp": "2025-03-01T10:00:00.123456"},
            "melon_77": {"artist": "Y", "title": "U", "timestamp": "2025-03-05T08:30:00"}
        }"#).unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        let entry = ledger.get("spotify_abc").unwrap();
        assert_eq!(entry.platform, Some(Platform::Spotify));
        assert_eq!(entry.recorded_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap() + Duration::microseconds(123456));
        assert_eq!(ledger.get("melon_77").unwrap().platform, Some(Platform::Melon));

        // rewritten in the current shape, and the entries age out as usual
        ledger.save().unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("recorded_at") && !raw.contains("timestamp"));

        let now = Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap();
        assert_eq!(ledger.prune(now, Duration::days(30)), 1);
        assert!(ledger.contains("melon_77"));
    }

    #[test]
    fn save_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked_releases.json");

        let mut ledger = Ledger::empty(&path);
        ledger.record(&release(Platform::YouTube, "v1"), t0());
        ledger.save().unwrap();

        ledger.prune(t0() + Duration::days(60), Duration::days(30));
        ledger.save().unwrap();

        assert!(Ledger::load(&path).unwrap().is_empty());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn record_overwrites_timestamp() {
        let mut ledger = Ledger::empty("unused.json");
        let r = release(Platform::YouTube, "v1");
        ledger.record(&r, t0());
        ledger.record(&r, t0() + Duration::days(3));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("youtube_v1").unwrap().recorded_at, t0() + Duration::days(3));
    }

    #[test]
    fn eviction_happens_only_past_retention() {
        let retention = Duration::days(30);
        let epsilon = Duration::seconds(1);

        let mut ledger = Ledger::empty("unused.json");
        ledger.record(&release(Platform::YouTube, "v1"), t0());

        assert_eq!(ledger.prune(t0() + retention - epsilon, retention), 0);
        assert!(ledger.contains("youtube_v1"));

        // many runs per day must not shorten the window
        for hour in 0..24 {
            ledger.prune(t0() + Duration::days(29) + Duration::hours(hour), retention);
        }
        assert!(ledger.contains("youtube_v1"));

        assert_eq!(ledger.prune(t0() + retention + epsilon, retention), 1);
        assert!(!ledger.contains("youtube_v1"));
    }

    #[test]
    fn entry_from_31_days_ago_is_pruned() {
        let now = t0() + Duration::days(31);
        let mut ledger = Ledger::empty("unused.json");
        ledger.record(&release(Platform::YouTube, "v1"), t0());
        ledger.record(&release(Platform::Spotify, "fresh"), now - Duration::days(2));

        assert_eq!(ledger.prune(now, Duration::days(30)), 1);
        assert!(!ledger.contains("youtube_v1"));
        assert!(ledger.contains("spotify_fresh"));
    }
}
