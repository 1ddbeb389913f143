//! Granicus publishers: a listing page of archived meetings, each one
//! played from an HLS playlist.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use time::{macros::format_description, Date};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::ChannelConfig,
    outside::{Request, Transport},
    result::{Error, Result},
    types::{ClipRange, MeetingManifest, MeetingSource, VendorKind},
};

use super::{fetch_page, html, site_url, VendorAdapter};

const STREAMS_PATH: &str = "/player/GetStreams.php";

fn clip_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"clipId:\s*'([\w\-]+)'").unwrap())
}

fn player_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"open\('([^']+)',\s*'player'").unwrap())
}

fn title_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*\(\w+\.? \d+, \d+\)").unwrap())
}

/// One row of the archive listing
#[derive(Debug, Clone, PartialEq, Eq)]
struct Listing {
    title: String,
    date: Date,
    player_url: String,
}

/// `[rtmp_url, m3u8_url]`
#[derive(Debug, Deserialize)]
struct Streams(String, String);

/// `Jan. 12, 2016`
fn parse_listing_date(value: &str) -> Option<Date> {
    let value = html::collapse_whitespace(value).replace('.', "");
    Date::parse(
        &value,
        format_description!("[month repr:short] [day padding:none], [year]"),
    )
    .ok()
}

/// Rows of the archive table, the second listing table of the page
fn parse_listing(channel: &ChannelConfig, page: &str) -> Result<Vec<Listing>> {
    let tables = html::elements_with(page, "table", "class", "listingTable");
    let Some(table) = tables.get(1) else {
        return Err(Error::discovery(&channel.id, "archive listing table not found"));
    };

    let mut listings = vec![];
    for row in html::rows(table) {
        let cells = html::cells(row);
        if cells.len() < 5 {
            continue;
        }
        let Some(date) = parse_listing_date(&html::text(cells[1].inner)) else {
            debug!("Skipping row with date '{}'", html::text(cells[1].inner));
            continue;
        };
        let Some(player_url) = html::first_anchor(cells[4].inner)
            .and_then(|a| a.attributes.get("onclick").cloned())
            .and_then(|onclick| player_re().captures(&onclick).map(|cap| cap[1].to_owned()))
        else {
            debug!("Skipping row of {date} without video");
            continue;
        };

        let title = html::text(cells[0].inner);
        listings.push(Listing {
            title: title_date_re().replace_all(&title, "").trim().to_owned(),
            date,
            player_url,
        });
    }
    Ok(listings)
}

/// Uncommented lines of a playlist with the duration announced before them
fn playlist_entries(playlist: &str) -> Vec<(Option<f64>, &str)> {
    let mut entries = vec![];
    let mut duration = None;
    for line in playlist.lines().map(str::trim) {
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            duration = info.split(',').next().and_then(|d| d.trim().parse().ok());
        } else if !line.is_empty() && !line.starts_with('#') {
            entries.push((duration.take(), line));
        }
    }
    entries
}

fn target_duration(playlist: &str) -> Option<f64> {
    playlist
        .lines()
        .find_map(|line| line.trim().strip_prefix("#EXT-X-TARGETDURATION:"))
        .and_then(|d| d.trim().parse().ok())
}

#[derive(Debug)]
pub struct Granicus<'a> {
    transport: &'a dyn Transport,
}

impl<'a> Granicus<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    fn listings(&self, channel: &ChannelConfig) -> Result<Vec<Listing>> {
        let page = fetch_page(self.transport, channel, &Request::get(&channel.url))?;
        parse_listing(channel, &page)
    }

    fn clip_id(&self, channel: &ChannelConfig, player_url: &str) -> Result<String> {
        let page = fetch_page(self.transport, channel, &Request::get(player_url))?;
        clip_id_re()
            .captures(&page)
            .map(|cap| cap[1].to_owned())
            .ok_or_else(|| Error::discovery(&channel.id, format!("no clip id in {player_url}")))
    }

    fn m3u8_url(&self, channel: &ChannelConfig, clip_id: &str) -> Result<String> {
        let request = Request::get(site_url(channel, STREAMS_PATH)?).query("clip_id", clip_id);
        let body = fetch_page(self.transport, channel, &request)?;
        let Streams(_, m3u8) = serde_json::from_str(&body).map_err(|err| {
            Error::discovery(&channel.id, format!("unexpected streams of clip {clip_id}: {err}"))
        })?;
        Ok(m3u8)
    }

    /// The pieces of the video, from the chunk list the playlist points to
    fn pieces(&self, channel: &ChannelConfig, m3u8: &str) -> Result<Vec<ClipRange>> {
        let invalid =
            |err: url::ParseError| Error::discovery(&channel.id, format!("{m3u8}: {err}"));
        let base = Url::parse(m3u8).map_err(invalid)?;

        let playlist = fetch_page(self.transport, channel, &Request::get(m3u8))?;
        let Some((_, chunklist)) = playlist_entries(&playlist).into_iter().next() else {
            return Err(Error::discovery(&channel.id, format!("empty playlist {m3u8}")));
        };
        let chunklist_url = base.join(chunklist).map_err(invalid)?;
        let chunks = fetch_page(self.transport, channel, &Request::get(chunklist_url.as_str()))?;
        let fallback = target_duration(&chunks);

        let mut ranges = vec![];
        let mut start = 0.0;
        for (duration, piece) in playlist_entries(&chunks) {
            if !piece.ends_with(".ts") {
                continue;
            }
            let Some(duration) = duration.or(fallback) else {
                return Err(Error::discovery(
                    &channel.id,
                    format!("no duration for piece {piece} of {m3u8}"),
                ));
            };
            ranges.push(ClipRange {
                index: ranges.len(),
                start,
                end: start + duration,
                locator: base.join(piece).map_err(invalid)?.into(),
                expected_size: None,
            });
            start += duration;
        }
        Ok(ranges)
    }
}

impl VendorAdapter for Granicus<'_> {
    fn kind(&self) -> VendorKind {
        VendorKind::Granicus
    }

    fn discover_manifests(
        &self,
        channel: &ChannelConfig,
        date: Date,
    ) -> Result<Vec<MeetingManifest>> {
        let listings: Vec<Listing> = self
            .listings(channel)?
            .into_iter()
            .filter(|listing| listing.date == date)
            .collect();
        info!("{}: {} meetings on {date}", channel.id, listings.len());

        let mut manifests = Vec::with_capacity(listings.len());
        for listing in listings {
            let clip_id = self.clip_id(channel, &listing.player_url)?;
            let m3u8 = self.m3u8_url(channel, &clip_id)?;
            let ranges = self.pieces(channel, &m3u8)?;
            debug!("Clip {clip_id} has {} pieces", ranges.len());

            manifests.push(MeetingManifest {
                vendor: VendorKind::Granicus,
                channel: channel.id.clone(),
                date,
                native_id: clip_id,
                title: listing.title,
                category: None,
                chapters: vec![],
                source: MeetingSource::Clips { ranges },
            });
        }
        Ok(manifests)
    }

    fn available_dates(&self, channel: &ChannelConfig, from: Date, to: Date) -> Result<Vec<Date>> {
        let mut dates: Vec<Date> = self
            .listings(channel)?
            .into_iter()
            .map(|listing| listing.date)
            .filter(|date| from <= *date && *date <= to)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}
