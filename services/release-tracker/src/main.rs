//!
//! src/main.rs
//!
//! Single tracking run: checks every configured artist on every enabled
//! platform, posts new releases to Discord and exits. Schedule it with cron.
//!
//!

mod config;
mod errors;
mod logging;

mod fetch;
mod ledger;
mod pacing;
mod sink;
mod sources;
mod tracker;
mod types;

mod melon;
mod spotify;
mod youtube;

use crate::errors::TrackerError;
use crate::sources::ReleaseSource;

/// Enabled sources in polling order
fn build_sources(cfgs: &config::AppConfig) -> Result<Vec<Box<dyn ReleaseSource>>, TrackerError> {
    let mut sources: Vec<Box<dyn ReleaseSource>> = Vec::new();

    match &cfgs.spotify {
        Some(spotify) => {
            let client = fetch::SpotifyClient::new(&cfgs.http, spotify)?;
            sources.push(Box::new(spotify::SpotifySource::new(client)));
        },
        None => tracing::warn!(platform = "Spotify", "source.disabled")
    }

    match &cfgs.youtube {
        Some(youtube) => {
            let client = fetch::YouTubeClient::new(&cfgs.http, youtube)?;
            sources.push(Box::new(youtube::YouTubeSource::new(client)));
        },
        None => tracing::warn!(platform = "YouTube", "source.disabled")
    }

    let melon = fetch::MelonClient::new(&cfgs.http, &cfgs.melon)?;
    sources.push(Box::new(melon::MelonSource::new(melon)));

    Ok(sources)
}

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    let cfgs    = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service="release-tracker",
        version=%env!("CARGO_PKG_VERSION"),
        "starting"
    );
    tracing::debug!(config = ?cfgs, "config.loaded");

    let artists = config::load_artists(&cfgs.persistence.artists_file)?;
    let sources = build_sources(&cfgs)?;
    let discord = fetch::DiscordClient::new(&cfgs.http, &cfgs.discord)?;
    let sink    = sink::DiscordWebhookSink::new(discord);

    let tracker = tracker::Tracker::new(
        artists,
        sources,
        Box::new(sink),
        cfgs.persistence.ledger_file.clone(),
        cfgs.tracking.clone()
    );

    let report = match tracker.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "run.failed");
            return Err(e);
        }
    };

    tracing::info!(
        artists = report.artists,
        fetched = ?report.fetched,
        failed_pairs = report.failed_pairs,
        new_records = report.new_records,
        sent = report.sent,
        failed_submissions = report.failed_submissions,
        pruned = report.pruned,
        ledger_saved = report.ledger_saved,
        "run.complete"
    );

    Ok(())
}
