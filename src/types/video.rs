use std::{fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};
use time::Date;

use super::{Chapter, MeetingManifest, VendorKind};

/// Identity of the manifest a video was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub id: String,
    pub vendor: VendorKind,
    pub channel: String,
    pub date: Date,
    pub native_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl From<&MeetingManifest> for ManifestRef {
    fn from(manifest: &MeetingManifest) -> Self {
        Self {
            id: manifest.id(),
            vendor: manifest.vendor,
            channel: manifest.channel.clone(),
            date: manifest.date,
            native_id: manifest.native_id.clone(),
            title: manifest.title.clone(),
            category: manifest.category.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum ProvenanceNote {
    /// Missing footage below the gap threshold, skipped over
    BridgedGap { at: f64, duration: f64 },
    /// Clips had different codec parameters
    ReencodedConcat,
    /// Stream could not be cut without re-encoding
    ReencodedSplice,
    /// Extra seconds kept around the vendor timecodes
    Padded { before: u64, after: u64 },
}

/// Final per-meeting artifact handed to publishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedVideo {
    pub path: PathBuf,
    pub manifest: ManifestRef,
    /// Seconds
    pub duration: f64,
    pub units: Vec<String>,
    pub notes: Vec<ProvenanceNote>,
    pub chapters: Vec<Chapter>,
}

impl ReconstructedVideo {
    pub fn bridged_gaps(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.notes.iter().filter_map(|note| match note {
            ProvenanceNote::BridgedGap { at, duration } => Some((*at, *duration)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Fetch,
    Reconstruction,
    Timecode,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Fetch => "fetch",
            FailureKind::Reconstruction => "reconstruction",
            FailureKind::Timecode => "timecode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(FailureKind::Validation),
            "fetch" => Some(FailureKind::Fetch),
            "reconstruction" => Some(FailureKind::Reconstruction),
            "timecode" => Some(FailureKind::Timecode),
            _ => None,
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// `{channel}/{date}_{manifest id}`, the key of the meeting in the database
    pub manifest_id: String,
    pub title: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Counts of a run, plus the failed meetings
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub discovered: usize,
    pub reconstructed: usize,
    pub skipped_empty: usize,
    pub already_done: usize,
    pub failed: Vec<FailureRecord>,
    /// Dates whose discovery failed
    pub failed_dates: Vec<Date>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.failed_dates.is_empty()
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} discovered, {} reconstructed, {} already done, {} skipped (no video), {} failed",
            self.discovered,
            self.reconstructed,
            self.already_done,
            self.skipped_empty,
            self.failed.len()
        )?;
        if !self.failed_dates.is_empty() {
            write!(f, ", {} dates not discovered", self.failed_dates.len())?;
        }
        Ok(())
    }
}
