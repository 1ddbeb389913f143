//! InsInc meeting archives.
//!
//! A whole evening is recorded as one Windows Media stream and every
//! meeting, agenda item included, is a pair of timecodes into it.

use std::sync::OnceLock;

use regex::Regex;
use time::{macros::format_description, Date};
use tracing::{debug, info, warn};

use crate::{
    config::ChannelConfig,
    outside::{Request, Transport},
    result::{Error, Result},
    types::{
        Chapter, MeetingManifest, MeetingSource, ResourceLocator, StreamSplice, Timecode,
        UnitDescriptor, VendorKind,
    },
};

use super::{
    fetch_page,
    grouping::{group_root_and_subclips, Group, Titled, INSINC_ROOTS},
    html,
    neulion::parse_ymd,
    VendorAdapter,
};

const SEARCH_PATH: &str = "/meeting_search_sl.php";
const CALENDAR_PATH: &str = "/meeting_search.php";
const RESPONSE_PREFIX: &str = "+:var res = { \"result\": '";
const RESPONSE_SUFFIX: &str = "'}; res;";

fn media_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"javascript:reload_media_sl\('(mms://[\w\-./]+)', ",
            r"'(\d+:\d+:\d+)', '(\d+:\d+:\d+)'\)"
        ))
        .unwrap()
    })
}

fn calendar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"write_date_string\(\\'(\d+)-(\d+)-(\d+)\\'\)").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clip {
    category: Option<String>,
    title: String,
    mms_url: String,
    /// Date of the clip itself, it may differ from the searched date
    date: Date,
    start: Timecode,
    end: Timecode,
}

impl Titled for Clip {
    fn title(&self) -> &str {
        &self.title
    }
}

/// Known typo of the archive
fn fix_timecode(raw: &str) -> &str {
    match raw {
        "41:09:00" => "00:41:09",
        raw => raw,
    }
}

/// The search answers with HTML inside a JavaScript string
fn unwrap_response(body: &str) -> String {
    let body = body.trim_end();
    let body = body.strip_prefix(RESPONSE_PREFIX).unwrap_or(body);
    let body = body.strip_suffix(RESPONSE_SUFFIX).unwrap_or(body);
    body.replace("\\n", "\n")
        .replace("\\'", "'")
        .replace("\\\"", "\"")
}

fn parse_cell_date(value: &str) -> Option<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .or_else(|_| {
            Date::parse(
                value,
                format_description!("[month repr:short] [day padding:none], [year]"),
            )
        })
        .or_else(|_| {
            Date::parse(
                value,
                format_description!("[month repr:long] [day padding:none], [year]"),
            )
        })
        .ok()
}

fn parse_clips(channel: &ChannelConfig, searched: Date, body: &str) -> Result<Vec<Clip>> {
    let page = unwrap_response(body);
    let cells = html::cells(&page);

    let mut clips = vec![];
    let mut category = None;
    for (i, cell) in cells.iter().enumerate() {
        if !cell.has_class("gameDate") {
            continue;
        }
        if let Some(strong) = html::first_element(cell.inner, "strong") {
            category = Some(html::text(strong));
            continue;
        }
        let Some(anchor) = html::first_anchor(cell.inner) else {
            continue;
        };
        let href = anchor.attributes.get("href").map_or("", String::as_str);
        let Some(cap) = media_re().captures(href) else {
            continue;
        };

        let timecode = |raw: &str| {
            fix_timecode(raw)
                .parse::<Timecode>()
                .map_err(|err| Error::discovery(&channel.id, err))
        };
        // The date is in the cell before
        let date = i
            .checked_sub(1)
            .and_then(|prev| parse_cell_date(&html::text(cells[prev].inner)))
            .unwrap_or(searched);
        if date != searched {
            debug!("Clip '{}' is dated {date}", anchor.text);
        }

        clips.push(Clip {
            category: category.clone(),
            title: anchor.text,
            mms_url: cap[1].to_owned(),
            date,
            start: timecode(&cap[2])?,
            end: timecode(&cap[3])?,
        });
    }
    Ok(clips)
}

/// Group consecutive clips sharing a stream, putting the whole meeting
/// clips before their agenda items
fn group_by_stream(clips: Vec<Clip>) -> Vec<(String, Vec<Clip>)> {
    let mut streams: Vec<(String, Vec<Clip>)> = vec![];
    for clip in clips {
        match streams.last_mut() {
            Some((url, group)) if *url == clip.mms_url => group.push(clip),
            _ => streams.push((clip.mms_url.clone(), vec![clip])),
        }
    }

    streams
        .into_iter()
        .map(|(url, clips)| (url, order_stream_clips(clips)))
        .collect()
}

fn order_stream_clips(mut clips: Vec<Clip>) -> Vec<Clip> {
    let rules = &INSINC_ROOTS;
    if rules.is_root(&clips[0].title) {
        clips[1..].sort_by_key(|clip| clip.start);
    } else {
        clips.sort_by_key(|clip| clip.start);
    }

    let n = clips.len();
    if n > 1 && !rules.is_root(&clips[0].title) {
        // The root clip is listed with a timecode later than its first item
        if rules.is_root_or_starts_with(&clips[1].title, Some("opening remarks")) {
            let first = clips[0].start;
            clips[0].start = clips[1].start;
            clips[1].start = first;
        } else if rules.is_root(&clips[n - 1].title) {
            clips[n - 1].start = clips[0].start.shift(-1);
        } else if rules.is_root(&clips[n - 2].title) {
            clips[n - 2].start = clips[0].start.shift(-1);
        }
        clips.sort_by_key(|clip| clip.start);
    }

    clips.dedup_by(|next, prev| next.title == prev.title);
    clips
}

/// `mms://host/path/name.wmv` -> `name`
fn stream_id(mms_url: &str) -> String {
    let name = mms_url.rsplit('/').next().unwrap_or(mms_url);
    name.strip_suffix(".wmv").unwrap_or(name).to_owned()
}

fn manifest_of(channel: &ChannelConfig, date: Date, group: Group<Clip>) -> MeetingManifest {
    let Group { root, subclips } = group;
    let start = subclips.iter().map(|c| c.start).fold(root.start, Timecode::min);
    let end = subclips.iter().map(|c| c.end).fold(root.end, Timecode::max);

    let mut chapters: Vec<Chapter> = subclips
        .iter()
        .map(|clip| Chapter {
            offset: clip.start,
            title: clip.title.clone(),
        })
        .collect();
    if chapters.is_empty() {
        chapters.push(Chapter {
            offset: root.start,
            title: root.title.clone(),
        });
    }

    let stream_id = stream_id(&root.mms_url);
    MeetingManifest {
        vendor: VendorKind::InsInc,
        channel: channel.id.clone(),
        date,
        native_id: format!("{stream_id}_{}", root.start.to_string().replace(':', "")),
        title: root.title,
        category: root.category,
        chapters,
        source: MeetingSource::Stream {
            splice: StreamSplice {
                stream_id,
                locator: root.mms_url,
                start,
                end,
            },
        },
    }
}

#[derive(Debug)]
pub struct InsInc<'a> {
    transport: &'a dyn Transport,
}

impl<'a> InsInc<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    fn search(
        &self,
        channel: &ChannelConfig,
        path: &str,
        rs: &str,
        args: &[String],
    ) -> Result<String> {
        let mut request = Request::post(format!("{}{path}", channel.url.trim_end_matches('/')))
            .form("rs", rs);
        for arg in args {
            request = request.form("rsargs[]", arg.as_str());
        }
        fetch_page(self.transport, channel, &request)
    }

    fn month_dates(&self, channel: &ChannelConfig, year: i32, month: u8) -> Result<Vec<Date>> {
        let body = self.search(
            channel,
            CALENDAR_PATH,
            "show_calendar",
            &[year.to_string(), format!("{month:02}")],
        )?;
        Ok(calendar_re()
            .captures_iter(&body)
            .filter_map(|cap| parse_ymd(&cap[1], &cap[2], &cap[3]))
            .collect())
    }
}

impl VendorAdapter for InsInc<'_> {
    fn kind(&self) -> VendorKind {
        VendorKind::InsInc
    }

    /// Meetings of the streams recorded on the date
    fn discover_manifests(
        &self,
        channel: &ChannelConfig,
        date: Date,
    ) -> Result<Vec<MeetingManifest>> {
        let body = self.search(
            channel,
            SEARCH_PATH,
            "search_clips_sl",
            &[String::new(), date.to_string(), String::new()],
        )?;
        let clips = parse_clips(channel, date, &body)?;
        info!("{}: {} clips on {date}", channel.id, clips.len());

        let mut manifests = vec![];
        for (url, clips) in group_by_stream(clips) {
            if clips[0].title.starts_with("Due to Technical Difficulties") {
                warn!("Skipping stream {url}: '{}'", clips[0].title);
                continue;
            }
            for group in group_root_and_subclips(clips, &INSINC_ROOTS) {
                manifests.push(manifest_of(channel, date, group));
            }
        }
        Ok(manifests)
    }

    fn available_dates(&self, channel: &ChannelConfig, from: Date, to: Date) -> Result<Vec<Date>> {
        let mut dates = vec![];
        let (mut year, mut month) = (from.year(), u8::from(from.month()));
        while (year, month) <= (to.year(), u8::from(to.month())) {
            dates.extend(
                self.month_dates(channel, year, month)?
                    .into_iter()
                    .filter(|date| from <= *date && *date <= to),
            );
            (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        }
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    /// Only the media tool reads `mms://`, through its HTTP flavour
    fn resource_locator_for(&self, unit: &UnitDescriptor) -> ResourceLocator {
        let url = match unit.resource.strip_prefix("mms://") {
            Some(rest) => format!("mmsh://{rest}"),
            None => unit.resource.clone(),
        };
        ResourceLocator::MediaStream { url }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use time::macros::date;

    use super::*;
    use crate::testing::FakeTransport;

    const SITE: &str = "http://coquitlam.insinc.com";
    const STREAM: &str = "mms://media.insinc.com/coquitlam/coq_20161212.wmv";

    fn clip_row(date: &str, title: &str, start: &str, end: &str) -> String {
        format!(
            "<tr><td class=\\\"date\\\">{date}</td><td class=\\\"gameDate\\\"><a href=\\\"javascript:reload_media_sl(\\'{STREAM}\\', \\'{start}\\', \\'{end}\\')\\\">{title}</a></td></tr>\\n"
        )
    }

    fn search_response(rows: &[String]) -> String {
        format!(
            "{RESPONSE_PREFIX}<table><tr><td></td><td class=\\\"gameDate\\\"><strong>Regular Council</strong></td></tr>\\n{}</table>{RESPONSE_SUFFIX}",
            rows.concat()
        )
    }

    fn channel() -> ChannelConfig {
        ChannelConfig {
            id: "coquitlam".to_owned(),
            vendor: VendorKind::InsInc,
            url: SITE.to_owned(),
            tz: "America/Vancouver".to_owned(),
        }
    }

    fn discover(rows: &[String]) -> Result<Vec<MeetingManifest>> {
        let transport = FakeTransport::default();
        transport.page(
            &format!("{SITE}{SEARCH_PATH}?rs=search_clips_sl&rsargs[]=&rsargs[]=2016-12-12&rsargs[]="),
            &search_response(rows),
        );
        InsInc::new(&transport).discover_manifests(&channel(), date!(2016 - 12 - 12))
    }

    #[test]
    fn meeting_spans_root_and_items() {
        let manifests = discover(&[
            clip_row("2016-12-12", "Public Hearing", "00:00:20", "00:30:00"),
            clip_row("2016-12-12", "Call to Order", "00:00:10", "00:02:00"),
            clip_row("2016-12-12", "Bylaw 4567", "00:02:00", "00:31:00"),
        ])
        .unwrap();
        assert_eq!(manifests.len(), 1);

        let meeting = &manifests[0];
        assert_eq!(meeting.title, "Public Hearing");
        assert_eq!(meeting.category.as_deref(), Some("Regular Council"));
        assert_eq!(meeting.native_id, "coq_20161212_000020");
        assert_eq!(meeting.chapters.len(), 2);
        let MeetingSource::Stream { splice } = &meeting.source else {
            panic!("stream meeting expected");
        };
        assert_eq!(splice.stream_id, "coq_20161212");
        assert_eq!(splice.start, Timecode::from_secs(10));
        assert_eq!(splice.end, Timecode::from_secs(31 * 60));
    }

    #[test]
    fn several_meetings_share_one_stream() {
        let manifests = discover(&[
            clip_row("2016-12-12", "Public Hearing", "00:00:00", "00:30:00"),
            clip_row("2016-12-12", "Special Council Meeting", "01:00:00", "02:00:00"),
        ])
        .unwrap();
        assert_eq!(manifests.len(), 2);

        let transport = FakeTransport::default();
        let adapter = InsInc::new(&transport);
        let first = adapter.plan_units(&manifests[0]).unwrap();
        let second = adapter.plan_units(&manifests[1]).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            adapter.resource_locator_for(&first[0]),
            ResourceLocator::MediaStream {
                url: "mmsh://media.insinc.com/coquitlam/coq_20161212.wmv".to_owned()
            }
        );
    }

    #[test]
    fn typo_timecode_is_fixed() {
        let manifests = discover(&[clip_row(
            "2016-12-12",
            "Full Council Meeting",
            "41:09:00",
            "01:30:00",
        )])
        .unwrap();
        let MeetingSource::Stream { splice } = &manifests[0].source else {
            panic!("stream meeting expected");
        };
        assert_eq!(splice.start, Timecode::from_secs(41 * 60 + 9));
    }

    #[test]
    fn reversed_timecodes_are_kept_for_validation() {
        let manifests = discover(&[clip_row(
            "2016-12-12",
            "Public Hearing",
            "01:00:00",
            "00:30:00",
        )])
        .unwrap();
        assert!(matches!(
            manifests[0].validate(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn technical_difficulties_streams_are_skipped() {
        let manifests = discover(&[clip_row(
            "2016-12-12",
            "Due to Technical Difficulties there is no video",
            "00:00:00",
            "00:30:00",
        )])
        .unwrap();
        assert!(manifests.is_empty());
    }

    #[test]
    fn duplicated_items_are_dropped() {
        let clips = vec![
            Clip {
                category: None,
                title: "Public Hearing".to_owned(),
                mms_url: STREAM.to_owned(),
                date: date!(2016 - 12 - 12),
                start: Timecode::from_secs(0),
                end: Timecode::from_secs(600),
            },
            Clip {
                category: None,
                title: "Bylaw".to_owned(),
                mms_url: STREAM.to_owned(),
                date: date!(2016 - 12 - 12),
                start: Timecode::from_secs(10),
                end: Timecode::from_secs(20),
            },
        ];
        let mut doubled = clips.clone();
        doubled.push(clips[1].clone());
        let grouped = group_by_stream(doubled);
        assert_eq!(grouped, vec![(STREAM.to_owned(), clips)]);
    }

    #[test]
    fn calendar_dates_over_months() {
        let transport = FakeTransport::default();
        transport.page(
            &format!("{SITE}{CALENDAR_PATH}?rs=show_calendar&rsargs[]=2016&rsargs[]=11"),
            indoc! {r"
                <a href=\'javascript: write_date_string(\'2016-11-14\')\'>14</a>
                <a href=\'javascript: write_date_string(\'2016-11-28\')\'>28</a>
            "},
        );
        transport.page(
            &format!("{SITE}{CALENDAR_PATH}?rs=show_calendar&rsargs[]=2016&rsargs[]=12"),
            r"<a href=\'javascript: write_date_string(\'2016-12-12\')\'>12</a>",
        );

        let dates = InsInc::new(&transport)
            .available_dates(&channel(), date!(2016 - 11 - 20), date!(2016 - 12 - 31))
            .unwrap();
        assert_eq!(dates, vec![date!(2016 - 11 - 28), date!(2016 - 12 - 12)]);
    }
}
