use std::fmt::Display;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::result::{Error, Result};

use super::{Extension, Timecode};

/// Clip ranges closer than this are considered touching
const RANGE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    Neulion,
    Granicus,
    InsInc,
}

impl VendorKind {
    pub fn name(self) -> &'static str {
        match self {
            VendorKind::Neulion => "neulion",
            VendorKind::Granicus => "granicus",
            VendorKind::InsInc => "insinc",
        }
    }

    /// Stream-based vendors publish one continuous stream per day
    /// that needs to be spliced into meetings
    pub fn is_stream_based(self) -> bool {
        matches!(self, VendorKind::InsInc)
    }

    pub fn unit_extension(self) -> Extension {
        match self {
            VendorKind::Neulion => Extension::Mp4,
            VendorKind::Granicus => Extension::Ts,
            VendorKind::InsInc => Extension::Wmv,
        }
    }
}

impl Display for VendorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open interval `[start, end)` in seconds from the meeting start,
/// along with the remote resource holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
}

impl ClipRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Region of a shared stream belonging to one meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSplice {
    pub stream_id: String,
    pub locator: String,
    pub start: Timecode,
    pub end: Timecode,
}

impl StreamSplice {
    pub fn duration(&self) -> u64 {
        self.end.as_secs().saturating_sub(self.start.as_secs())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub offset: Timecode,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MeetingSource {
    Clips { ranges: Vec<ClipRange> },
    Stream { splice: StreamSplice },
}

/// Vendor-agnostic description of one meeting's available video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingManifest {
    pub vendor: VendorKind,
    pub channel: String,
    pub date: Date,
    pub native_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    pub source: MeetingSource,
}

impl MeetingManifest {
    /// Filesystem-safe identifier derived from the vendor identifier
    pub fn id(&self) -> String {
        sanitize_id(&self.native_id)
    }

    /// Some vendors publish meetings without any recorded video
    pub fn is_empty(&self) -> bool {
        match &self.source {
            MeetingSource::Clips { ranges } => ranges.is_empty(),
            MeetingSource::Stream { .. } => false,
        }
    }

    /// Duration the meeting would have if every piece was available
    pub fn nominal_duration(&self) -> f64 {
        match &self.source {
            MeetingSource::Clips { ranges } => ranges.iter().map(ClipRange::duration).sum(),
            MeetingSource::Stream { splice } => splice.duration() as f64,
        }
    }

    /// Check the ordering and the boundaries of the timecodes
    pub fn validate(&self) -> Result<()> {
        let id = self.id();
        match &self.source {
            MeetingSource::Stream { splice } => {
                if splice.end <= splice.start {
                    return Err(Error::validation(
                        &id,
                        format!(
                            "splice of stream '{}' ends at {} which is not after its start {}",
                            splice.stream_id, splice.end, splice.start
                        ),
                    ));
                }
            }
            MeetingSource::Clips { ranges } => {
                for range in ranges {
                    if range.end <= range.start {
                        return Err(Error::validation(
                            &id,
                            format!("clip range {} is empty or reversed", range.index),
                        ));
                    }
                }
                for pair in ranges.windows(2) {
                    let (prev, next) = (&pair[0], &pair[1]);
                    if next.start < prev.start {
                        return Err(Error::validation(
                            &id,
                            format!("clip range {} starts before range {}", next.index, prev.index),
                        ));
                    }
                    if next.start + RANGE_EPSILON < prev.end {
                        return Err(Error::validation(
                            &id,
                            format!(
                                "clip range {} ({:.3}s) overlaps range {} (ends {:.3}s)",
                                next.index, next.start, prev.index, prev.end
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Display for MeetingManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' ({})", self.date, self.title, self.id())
    }
}

/// Path component for a vendor identifier.
///
/// Characters other than ASCII alphanumerics, `-`, `_` and `.` are
/// percent-encoded, so distinct identifiers never share a path. Identifiers
/// made only of dots are encoded entirely and the empty one becomes `%`.
pub fn sanitize_id(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_owned();
    }
    let only_dots = raw.bytes().all(|b| b == b'.');

    let mut id = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'.' if only_dots => id.push_str("%2E"),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => id.push(byte as char),
            _ => id.push_str(&format!("%{byte:02X}")),
        }
    }
    id
}
