//!
//! src/tracker.rs
//!
//! One tracking run: load the ledger, poll every source for every artist,
//! drop what was already announced, notify, then record and persist
//!

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::errors::TrackerError;
use crate::ledger::Ledger;
use crate::pacing::RateGate;
use crate::sink::{dispatch, ReleaseSink};
use crate::sources::ReleaseSource;
use crate::types::{ArtistConfig, LookbackWindow, Platform, ReleaseRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Loading,
    Polling,
    Filtering,
    Dispatching,
    Persisting,
    Done
}

/// Counts an operator needs to judge a run without reading the logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub artists: usize,
    pub fetched: BTreeMap<Platform, usize>,
    pub failed_pairs: usize,
    pub new_records: usize,
    pub sent: usize,
    pub failed_submissions: usize,
    pub pruned: usize,
    pub ledger_saved: bool
}

impl RunReport {
    pub fn fetched_total(&self) -> usize {
        self.fetched.values().sum()
    }
}

///
/// Keeps records whose key is not in the ledger, first occurrence wins when
/// the same key shows up twice in one run. Input order is preserved.
///
pub fn filter_new(ledger: &Ledger, candidates: Vec<ReleaseRecord>) -> Vec<ReleaseRecord> {
    let mut seen = HashSet::new();
    candidates.into_iter()
        .filter(|r| !ledger.contains(r.dedup_key()) && seen.insert(r.dedup_key().to_string()))
        .collect()
}

pub struct Tracker {
    artists: Vec<ArtistConfig>,
    sources: Vec<Box<dyn ReleaseSource>>,
    sink: Box<dyn ReleaseSink>,
    ledger_path: PathBuf,
    tracking: TrackingConfig
}

impl Tracker {
    pub fn new(
        artists: Vec<ArtistConfig>,
        sources: Vec<Box<dyn ReleaseSource>>,
        sink: Box<dyn ReleaseSink>,
        ledger_path: impl Into<PathBuf>,
        tracking: TrackingConfig
    ) -> Self {
        Self { artists, sources, sink, ledger_path: ledger_path.into(), tracking }
    }

    pub async fn run(&self) -> Result<RunReport, TrackerError> {
        self.run_at(Utc::now()).await
    }

    /// A run anchored at `now`, which is used for the lookback window and for
    /// ledger timestamps
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, TrackerError> {
        let span = info_span!("run", run_id = %Uuid::new_v4());
        self.run_phases(now).instrument(span).await
    }

    fn enter(phase: RunPhase) {
        debug!(phase = ?phase, "tracker.phase");
    }

    async fn run_phases(&self, now: DateTime<Utc>) -> Result<RunReport, TrackerError> {
        let mut report = RunReport { artists: self.artists.len(), ..Default::default() };
        info!(
            artists = self.artists.len(),
            sources = self.sources.len(),
            "tracker.start"
        );

        if self.artists.is_empty() {
            warn!("tracker.no_artists");
            Self::enter(RunPhase::Done);
            return Ok(report);
        }

        Self::enter(RunPhase::Loading);
        let mut ledger = Ledger::load(&self.ledger_path)?;
        debug!(entries = ledger.len(), "tracker.ledger");

        Self::enter(RunPhase::Polling);
        let window = LookbackWindow::new(now, self.tracking.lookback);
        let candidates = self.poll(&window, &mut report).await;

        Self::enter(RunPhase::Filtering);
        let fresh = filter_new(&ledger, candidates);
        report.new_records = fresh.len();

        if fresh.is_empty() {
            info!(fetched = report.fetched_total(), "tracker.nothing_new");
            Self::enter(RunPhase::Done);
            return Ok(report);
        }

        Self::enter(RunPhase::Dispatching);
        info!(count = fresh.len(), "tracker.new_releases");
        let dispatched = dispatch(self.sink.as_ref(), &fresh, self.tracking.dispatch_pacing).await;
        report.sent = dispatched.sent;
        report.failed_submissions = dispatched.failed;

        // every survivor is recorded, delivered or not
        Self::enter(RunPhase::Persisting);
        for release in &fresh {
            ledger.record(release, now);
        }
        report.pruned = ledger.prune(now, self.tracking.retention);
        ledger.save()?;
        report.ledger_saved = true;

        Self::enter(RunPhase::Done);
        Ok(report)
    }

    /// Artists in configured order, sources in registration order
    async fn poll(&self, window: &LookbackWindow, report: &mut RunReport) -> Vec<ReleaseRecord> {
        let mut gate = RateGate::new(self.tracking.artist_pacing);
        let mut candidates = Vec::new();

        for artist in &self.artists {
            gate.wait().await;
            info!(artist = %artist.name, "tracker.poll.artist");

            for source in &self.sources {
                let platform = source.platform();
                match source.fetch_recent(artist, window).await {
                    Ok(records) => {
                        *report.fetched.entry(platform).or_default() += records.len();
                        candidates.extend(records);
                    },
                    Err(e) => {
                        report.failed_pairs += 1;
                        warn!(artist = %artist.name, platform = %platform,
                            error = %e, "tracker.poll.failed");
                    }
                }
            }
        }
        candidates
    }
}
