//!
//! src/melon.rs
//!
//! Melon source: scrapes the artist's song listing page, Melon has no public api
//!

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::MelonConfig;
use crate::errors::TrackerError;
use crate::fetch::{send_text, MelonClient};
use crate::sources::{finish_draft, ReleaseSource};
use crate::types::{ArtistConfig, LookbackWindow, Platform, ReleaseDraft, ReleaseRecord};

/// Listing dates look like 2024.12.13
const DATE_FORMAT: &str = "%Y.%m.%d";

fn selector(css: &'static str) -> Result<Selector, TrackerError> {
    Selector::parse(css).map_err(|e| TrackerError::Parse(format!("selector {css}: {e:?}")))
}

/// Stripped text of the first match among `candidates`, in order
fn first_text(row: &ElementRef, candidates: &[&Selector]) -> Option<String> {
    candidates.iter()
        .find_map(|sel| row.select(sel).next())
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|s| !s.is_empty())
}

struct Selectors {
    table: Selector,
    tbody: Selector,
    row: Selector,
    title: Selector,
    title_fallback: Selector,
    date: Selector,
    date_fallback: Selector,
    album: Selector,
    image: Selector
}

impl Selectors {
    fn new() -> Result<Self, TrackerError> {
        Ok( Self {
            table: selector("table.list_tb")?,
            tbody: selector("tbody")?,
            row: selector("tr[data-song-no]")?,
            title: selector("div.ellipsis.rank01")?,
            title_fallback: selector("a.fc_gray")?,
            date: selector("span.cnt")?,
            date_fallback: selector("td.wrap_date")?,
            album: selector("div.ellipsis.rank02")?,
            image: selector("img[src]")?
        })
    }
}

///
/// Extracts the newest rows of a Melon song listing that fall inside the window.
/// Rows that are missing a title or carry an unreadable date are skipped.
///
pub fn parse_listing(
    html: &str,
    artist: &str,
    cfg: &MelonConfig,
    window: &LookbackWindow
) -> Result<Vec<ReleaseRecord>, TrackerError> {
    let sel = Selectors::new()?;
    let document = Html::parse_document(html);

    let Some(table) = document.select(&sel.table).next()
        .or_else(|| document.select(&sel.tbody).next()) else {
        warn!(artist = %artist, "melon.table.missing");
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for row in table.select(&sel.row).take(cfg.max_rows) {
        let Some(song_no) = row.value().attr("data-song-no") else {
            continue;
        };

        let Some(title) = first_text(&row, &[&sel.title, &sel.title_fallback]) else {
            debug!(artist = %artist, song = %song_no, "melon.row.no_title");
            continue;
        };

        let Some(date_text) = first_text(&row, &[&sel.date, &sel.date_fallback]) else {
            continue;
        };
        let release_date = match NaiveDate::parse_from_str(&date_text, DATE_FORMAT) {
            Ok(d) => d,
            Err(e) => {
                warn!(artist = %artist, raw = %date_text, error = %e, "melon.row.bad_date");
                continue;
            }
        };

        if !window.admits_date(release_date) {
            continue;
        }

        let url = match Url::parse_with_params(&cfg.song_base, &[("songId", song_no)]) {
            Ok(u) => u.to_string(),
            Err(e) => {
                warn!(song = %song_no, error = %e, "melon.row.bad_url");
                continue;
            }
        };

        let image_url = row.select(&sel.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        if let Some(record) = finish_draft(ReleaseDraft {
            platform: Platform::Melon,
            source_id: song_no.to_string(),
            artist: artist.to_string(),
            title,
            release_type: "single".to_string(),
            url,
            image_url,
            album: first_text(&row, &[&sel.album]),
            release_date
        }) {
            records.push(record);
        }
    }

    Ok(records)
}

pub struct MelonSource {
    client: MelonClient
}

impl MelonSource {
    pub fn new(client: MelonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReleaseSource for MelonSource {
    fn platform(&self) -> Platform {
        Platform::Melon
    }

    async fn fetch_recent(
        &self,
        artist: &ArtistConfig,
        window: &LookbackWindow
    ) -> Result<Vec<ReleaseRecord>, TrackerError> {
        let Some(melon_url) = artist.melon_url.as_deref() else {
            return Ok(Vec::new());
        };

        let html = send_text(self.client.artist_songs(melon_url)?).await?;
        let records = parse_listing(&html, &artist.name, &self.client.cfg, window)?;

        debug!(artist = %artist.name, recent = records.len(), "melon.fetched");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crate::config::HttpConfig;

    fn window() -> LookbackWindow {
        let now = Utc.with_ymd_and_hms(2024, 12, 13, 9, 0, 0).unwrap();
        LookbackWindow::new(now, Duration::hours(24))
    }

    const LISTING: &str = r##"
        <html><body>
        <table class="list_tb"><tbody>
          <tr data-song-no="3001">
            <td><img src="https://cdnimg.melon.co.kr/a.jpg"></td>
            <td><div class="ellipsis rank01"><span><a href="#"> Fresh Song </a></span></div></td>
            <td><div class="ellipsis rank02"><a>Winter Album</a></div></td>
            <td><span class="cnt">2024.12.13</span></td>
          </tr>
          <tr data-song-no="3000">
            <td><a class="fc_gray">Yesterday Song</a></td>
            <td class="wrap_date">2024.12.12</td>
          </tr>
          <tr data-song-no="2999">
            <td><div class="ellipsis rank01">Old Song</div></td>
            <td><span class="cnt">2024.11.01</span></td>
          </tr>
          <tr data-song-no="2998">
            <td><div class="ellipsis rank01">Odd Date</div></td>
            <td><span class="cnt">12/13/2024</span></td>
          </tr>
          <tr data-song-no="2997">
            <td><span class="cnt">2024.12.13</span></td>
          </tr>
          <tr><td>header row</td></tr>
        </tbody></table>
        </body></html>
    "##;

    #[test]
    fn listing_rows_inside_window_are_kept() {
        let records = parse_listing(LISTING, "Loopy", &MelonConfig::default(), &window()).unwrap();
        assert_eq!(records.len(), 2);

        let fresh = &records[0];
        assert_eq!(fresh.dedup_key(), "melon_3001");
        assert_eq!(fresh.title(), "Fresh Song");
        assert_eq!(fresh.album(), Some("Winter Album"));
        assert_eq!(fresh.image_url(), Some("https://cdnimg.melon.co.kr/a.jpg"));
        assert_eq!(fresh.url(), "https://www.melon.com/song/detail.htm?songId=3001");
        assert_eq!(fresh.release_type(), "single");

        let fallback = &records[1];
        assert_eq!(fallback.dedup_key(), "melon_3000");
        assert_eq!(fallback.title(), "Yesterday Song");
        assert_eq!(fallback.album(), None);
    }

    #[test]
    fn only_the_newest_rows_are_inspected() {
        let cfg = MelonConfig { max_rows: 1, ..MelonConfig::default() };
        let records = parse_listing(LISTING, "Loopy", &cfg, &window()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn page_without_listing_is_empty() {
        let records = parse_listing(
            "<html><body><p>점검 중</p></body></html>", "Loopy", &MelonConfig::default(), &window()
        ).unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn fetches_the_configured_page() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("GET", "/artist/song.htm")
            .match_query(mockito::Matcher::UrlEncoded("artistId".into(), "1908520".into()))
            .match_header("accept-language", mockito::Matcher::Regex("^ko-KR".into()))
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(LISTING)
            .create_async()
            .await;

        let client = MelonClient::new(&HttpConfig::default(), &MelonConfig::default()).unwrap();
        let source = MelonSource::new(client);
        let artist = ArtistConfig {
            name: "Loopy".to_string(),
            melon_url: Some(format!("{}/artist/song.htm?artistId=1908520", server.url())),
            ..Default::default()
        };

        let records = source.fetch_recent(&artist, &window()).await.unwrap();
        page.assert_async().await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn blocked_page_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/artist/song.htm")
            .with_status(406)
            .create_async()
            .await;

        let client = MelonClient::new(&HttpConfig::default(), &MelonConfig::default()).unwrap();
        let artist = ArtistConfig {
            name: "Loopy".to_string(),
            melon_url: Some(format!("{}/artist/song.htm", server.url())),
            ..Default::default()
        };
        assert!(MelonSource::new(client).fetch_recent(&artist, &window()).await.is_err());
    }
}
