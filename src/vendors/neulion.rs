//! Neulion civic streaming sites.
//!
//! Clips are published as `adaptive://` URLs whose file name holds the
//! start time and duration. The video itself is served as 2 second MP4
//! segments named after their wall-clock time.

use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;
use time::{macros::format_description, Date, PrimitiveDateTime};
use tracing::{debug, info};

use crate::{
    config::ChannelConfig,
    outside::{Request, Transport},
    result::{Error, Result},
    types::{Chapter, ClipRange, MeetingManifest, MeetingSource, Timecode, VendorKind},
};

use super::{
    fetch_page,
    grouping::{group_root_and_subclips, Group, Titled, COMMON_ROOTS},
    html, site_url, VendorAdapter,
};

/// Length of one segment
pub const SEGMENT_SECS: i64 = 2;
/// Quality of the requested segments
const QUALITY: &str = "1600";
const API_PATH: &str = "/api/clipmanager.php";

fn adaptive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"adaptive://[^'"\s]+?\.mp4"#).unwrap())
}

fn allowed_dates_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"SEARCH_VARS\.allowedDates\s*=\s*\[([^\]]*)\]").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap())
}

#[derive(Debug, Clone, PartialEq)]
struct Clip {
    id: String,
    project: String,
    title: String,
    url: String,
    /// UTC
    start: PrimitiveDateTime,
    duration: i64,
}

impl Clip {
    fn end(&self) -> PrimitiveDateTime {
        self.start + time::Duration::seconds(self.duration)
    }
}

impl Titled for Clip {
    fn title(&self) -> &str {
        &self.title
    }
}

/// Start time and duration in seconds, from
/// `adaptive://host/path/name_pc_YYYYmmddHHMMSS_HHMMSS.mp4`
fn parse_time_range(url: &str) -> Option<(PrimitiveDateTime, i64)> {
    let name = url.rsplit('/').next()?.strip_suffix(".mp4")?;
    let (_, range) = name.split_once("_pc_")?;
    let (start, duration) = range.split_once('_')?;

    let start = PrimitiveDateTime::parse(
        start,
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .ok()?;
    if duration.len() != 6 || !duration.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| duration[range].parse::<i64>().ok();
    let secs = field(0..2)? * 3600 + field(2..4)? * 60 + field(4..6)?;
    Some((start, secs))
}

/// Segments start on even seconds
fn aligned_start(start: PrimitiveDateTime) -> PrimitiveDateTime {
    if start.second() % 2 == 1 {
        start - time::Duration::SECOND
    } else {
        start
    }
}

/// URLs of the 2 second segments covering the clip
pub fn segment_urls(adaptive_url: &str) -> Option<Vec<String>> {
    let (start, duration) = parse_time_range(adaptive_url)?;
    let parsed = url::Url::parse(adaptive_url).ok()?;
    let host = parsed.host_str()?;
    let path = parsed.path();
    let base = format!("http://{host}{}{QUALITY}", &path[..path.find("pc_")?]);

    let end = start + time::Duration::seconds(duration);
    let mut current = aligned_start(start);
    let mut urls = vec![];
    while current < end {
        urls.push(format!(
            "{base}/{:04}{:02}{:02}/{:02}/{:02}{:02}.mp4",
            current.year(),
            u8::from(current.month()),
            current.day(),
            current.hour(),
            current.minute(),
            current.second()
        ));
        current += time::Duration::seconds(SEGMENT_SECS);
    }
    Some(urls)
}

#[derive(Debug)]
pub struct Neulion<'a> {
    transport: &'a dyn Transport,
}

impl<'a> Neulion<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    fn site_page(&self, channel: &ChannelConfig) -> Result<String> {
        fetch_page(self.transport, channel, &Request::get(&channel.url))
    }

    /// Projects are meeting categories, the first one gathers all of them
    fn projects(&self, channel: &ChannelConfig, site: &str) -> Result<Vec<(String, String)>> {
        let selector = html::elements_with(site, "select", "id", "projectsSelector");
        let projects = selector.first().map(|s| html::options(s)).unwrap_or_default();
        if projects.is_empty() {
            return Err(Error::discovery(&channel.id, "no project selector on the site page"));
        }
        Ok(projects)
    }

    fn clips(&self, channel: &ChannelConfig, date: Date, project: &str) -> Result<Vec<Clip>> {
        let request = Request::get(site_url(channel, API_PATH)?)
            .query("f", "getClips")
            .query("device", "desktop")
            .query("prid", project)
            .query("proj_from", date.to_string())
            .query("tz", &channel.tz);
        let page = fetch_page(self.transport, channel, &request)?;

        let mut clips = vec![];
        for row in html::rows(&page) {
            let Some(anchor) = html::first_anchor(row) else {
                continue;
            };
            let onclick = anchor.attributes.get("onclick").map_or("", String::as_str);
            let Some(url) = adaptive_re().find(onclick) else {
                debug!("Skipping a clip row without video");
                continue;
            };
            let url = url.as_str().to_owned();
            let Some((start, duration)) = parse_time_range(&url) else {
                return Err(Error::discovery(&channel.id, format!("unexpected clip url '{url}'")));
            };

            let mut inputs = html::inputs(row);
            let descr = inputs.remove("clip_descr").unwrap_or_default();
            // Some titles are the url itself, the description is the title then
            let title = if anchor.text.starts_with("adaptive://") && !descr.is_empty() {
                html::collapse_whitespace(&descr)
            } else {
                anchor.text
            };

            clips.push(Clip {
                id: inputs.remove("clip_id").unwrap_or_else(|| url.clone()),
                project: inputs.remove("clip_project").unwrap_or_default(),
                title,
                url,
                start,
                duration,
            });
        }
        Ok(clips)
    }
}

/// Group clips into meetings.
///
/// Sometimes the whole meeting clip is only a few seconds long, it then
/// spans every other clip of the day.
fn group_clips(mut clips: Vec<Clip>) -> Vec<Group<Clip>> {
    clips.sort_by_key(|clip| clip.start);

    let truncated = clips.len() > 1
        && clips[0].title == "Entire Council Meeting"
        && clips[0].duration < 5;
    if truncated {
        let end = clips.iter().map(Clip::end).max().unwrap_or(clips[0].start);
        let mut subclips = clips.split_off(1);
        let mut root = clips.remove(0);
        root.duration = (end - root.start).whole_seconds();
        subclips.sort_by_key(|clip| clip.start);
        return vec![Group { root, subclips }];
    }

    group_root_and_subclips(clips, &COMMON_ROOTS)
}

fn manifest_of(
    channel: &ChannelConfig,
    date: Date,
    group: Group<Clip>,
    projects: &HashMap<String, String>,
) -> Result<MeetingManifest> {
    let Group { root, subclips } = group;
    let origin = aligned_start(root.start);

    let url = if root.duration == parse_time_range(&root.url).map_or(0, |(_, d)| d) {
        root.url.clone()
    } else {
        extended_url(&root)
    };
    let segments = segment_urls(&url)
        .ok_or_else(|| Error::discovery(&channel.id, format!("unexpected clip url '{url}'")))?;

    let ranges = segments
        .into_iter()
        .enumerate()
        .map(|(index, locator)| {
            let start = (index as i64 * SEGMENT_SECS) as f64;
            ClipRange {
                index,
                start,
                end: start + SEGMENT_SECS as f64,
                locator,
                expected_size: None,
            }
        })
        .collect();

    let chapters = subclips
        .iter()
        .map(|clip| Chapter {
            offset: Timecode::from_secs((clip.start - origin).whole_seconds().max(0) as u64),
            title: clip.title.clone(),
        })
        .collect();

    Ok(MeetingManifest {
        vendor: VendorKind::Neulion,
        channel: channel.id.clone(),
        date,
        native_id: root.id.clone(),
        title: root.title.clone(),
        category: projects.get(&root.project).cloned(),
        chapters,
        source: MeetingSource::Clips { ranges },
    })
}

/// Clip url with the duration of the clip, once it has been extended
fn extended_url(clip: &Clip) -> String {
    let Some((prefix, _)) = clip.url.rsplit_once('_') else {
        return clip.url.clone();
    };
    let d = clip.duration;
    format!("{prefix}_{:02}{:02}{:02}.mp4", d / 3600, (d % 3600) / 60, d % 60)
}

impl VendorAdapter for Neulion<'_> {
    fn kind(&self) -> VendorKind {
        VendorKind::Neulion
    }

    fn discover_manifests(
        &self,
        channel: &ChannelConfig,
        date: Date,
    ) -> Result<Vec<MeetingManifest>> {
        let site = self.site_page(channel)?;
        let projects = self.projects(channel, &site)?;
        let all_projects = projects[0].0.clone();
        let names: HashMap<String, String> = projects.into_iter().collect();

        let clips = self.clips(channel, date, &all_projects)?;
        info!("{}: {} clips on {date}", channel.id, clips.len());

        group_clips(clips)
            .into_iter()
            .map(|group| manifest_of(channel, date, group, &names))
            .collect()
    }

    fn available_dates(&self, channel: &ChannelConfig, from: Date, to: Date) -> Result<Vec<Date>> {
        let site = self.site_page(channel)?;
        let Some(list) = allowed_dates_re().captures(&site) else {
            return Err(Error::discovery(&channel.id, "no calendar on the site page"));
        };

        let mut dates = vec![];
        for cap in date_re().captures_iter(&list[1]) {
            let (y, m, d) = (&cap[1], &cap[2], &cap[3]);
            let date = parse_ymd(y, m, d)
                .ok_or_else(|| Error::discovery(&channel.id, format!("invalid date {y}-{m}-{d}")))?;
            if from <= date && date <= to {
                dates.push(date);
            }
        }
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

pub(super) fn parse_ymd(y: &str, m: &str, d: &str) -> Option<Date> {
    let month = time::Month::try_from(m.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(y.parse().ok()?, month, d.parse().ok()?).ok()
}
