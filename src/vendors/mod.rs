//! Vendor-specific discovery.
//!
//! Each backend publishes meetings its own way. An adapter turns them into
//! manifests and tells how their units can be retrieved, so that nothing
//! after it needs to know the vendor.

mod granicus;
mod grouping;
mod html;
mod insinc;
mod neulion;

use std::fmt::Debug;

use time::Date;

pub use granicus::Granicus;
pub use insinc::InsInc;
pub use neulion::Neulion;

use crate::{
    config::ChannelConfig,
    outside::{Request, Transport},
    result::{Error, Result},
    types::{MeetingManifest, MeetingSource, ResourceLocator, UnitDescriptor, VendorKind},
};

pub trait VendorAdapter: Sync + Debug {
    fn kind(&self) -> VendorKind;

    /// Every meeting of the channel on the date. No meeting is not an error.
    fn discover_manifests(&self, channel: &ChannelConfig, date: Date)
        -> Result<Vec<MeetingManifest>>;

    /// Dates of the inclusive range with video available
    fn available_dates(&self, channel: &ChannelConfig, from: Date, to: Date) -> Result<Vec<Date>>;

    /// The units to download for the meeting, in playback order
    fn plan_units(&self, manifest: &MeetingManifest) -> Result<Vec<UnitDescriptor>> {
        Ok(match &manifest.source {
            MeetingSource::Clips { ranges } => ranges
                .iter()
                .map(|range| UnitDescriptor {
                    index: range.index,
                    resource: range.locator.clone(),
                    expected_size: range.expected_size,
                    shared_stream: None,
                })
                .collect(),
            MeetingSource::Stream { splice } => vec![UnitDescriptor {
                index: 0,
                resource: splice.locator.clone(),
                expected_size: None,
                shared_stream: Some(splice.stream_id.clone()),
            }],
        })
    }

    fn resource_locator_for(&self, unit: &UnitDescriptor) -> ResourceLocator {
        ResourceLocator::Http(Request::get(&unit.resource))
    }
}

/// The adapter of a vendor, talking through the transport
pub fn adapter_for<'a>(
    vendor: VendorKind,
    transport: &'a dyn Transport,
) -> Box<dyn VendorAdapter + 'a> {
    match vendor {
        VendorKind::Neulion => Box::new(Neulion::new(transport)),
        VendorKind::Granicus => Box::new(Granicus::new(transport)),
        VendorKind::InsInc => Box::new(InsInc::new(transport)),
    }
}

/// Get a discovery page, any failure being a discovery error of the channel
fn fetch_page(
    transport: &dyn Transport,
    channel: &ChannelConfig,
    request: &Request,
) -> Result<String> {
    transport
        .fetch_text(request)
        .map_err(|err| Error::unreachable(&channel.id, err))
}

/// `{scheme}://{host}{path}` of the site of the channel
fn site_url(channel: &ChannelConfig, path: &str) -> Result<String> {
    let base = url::Url::parse(&channel.url).map_err(|err| {
        Error::discovery(&channel.id, format!("invalid url '{}': {err}", channel.url))
    })?;
    base.join(path)
        .map(String::from)
        .map_err(|err| Error::discovery(&channel.id, err))
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{
        testing::FakeTransport,
        types::{ClipRange, StreamSplice, Timecode},
    };

    fn channel(url: &str) -> ChannelConfig {
        ChannelConfig {
            id: "test".to_owned(),
            vendor: VendorKind::Neulion,
            url: url.to_owned(),
            tz: "America/Vancouver".to_owned(),
        }
    }

    #[test]
    fn site_url_keeps_scheme_and_host() {
        let ch = channel("http://civic.neulion.com/cityofsurrey/");
        assert_eq!(
            site_url(&ch, "/api/clipmanager.php").unwrap(),
            "http://civic.neulion.com/api/clipmanager.php"
        );
        assert!(matches!(
            site_url(&channel("not a url"), "/x"),
            Err(Error::Discovery { .. })
        ));
    }

    #[test]
    fn units_are_planned_from_the_source() {
        let transport = FakeTransport::default();
        let adapter = adapter_for(VendorKind::Granicus, &transport);
        let mut manifest = MeetingManifest {
            vendor: VendorKind::Granicus,
            channel: "vancouver".to_owned(),
            date: date!(2016 - 01 - 12),
            native_id: "1".to_owned(),
            title: "Council".to_owned(),
            category: None,
            chapters: vec![],
            source: MeetingSource::Clips {
                ranges: vec![ClipRange {
                    index: 0,
                    start: 0.0,
                    end: 10.0,
                    locator: "http://example.org/0.ts".to_owned(),
                    expected_size: Some(12),
                }],
            },
        };
        let units = adapter.plan_units(&manifest).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].expected_size, Some(12));
        assert_eq!(
            adapter.resource_locator_for(&units[0]),
            ResourceLocator::Http(Request::get("http://example.org/0.ts"))
        );

        manifest.source = MeetingSource::Stream {
            splice: StreamSplice {
                stream_id: "stream".to_owned(),
                locator: "mms://example.org/stream.wmv".to_owned(),
                start: Timecode::ZERO,
                end: Timecode::from_secs(60),
            },
        };
        let units = adapter.plan_units(&manifest).unwrap();
        assert_eq!(units[0].shared_stream.as_deref(), Some("stream"));
    }
}
