mod sqlite;

use std::path::{Path, PathBuf};

use miette::Result;

pub use sqlite::Sqlite;

use crate::types::{FailureKind, FailureRecord, MeetingManifest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingState {
    /// The meeting has never been reconstructed
    NotProcessed,

    /// The last reconstruction attempt failed
    Failed { kind: FailureKind, reason: String },

    /// The meeting video has been produced
    Completed { output: PathBuf },
}

/// Key of a meeting, unique across channels
pub fn meeting_key(manifest: &MeetingManifest) -> String {
    format!("{}/{}_{}", manifest.channel, manifest.date, manifest.id())
}

/// A trait for remembering the state of meetings between executions.
///
/// This lets a new run skip meetings that are already reconstructed, and
/// keeps the failures around for the operators.
pub trait CacheDb
where
    Self: Sized + Sync,
{
    /// Read the database file at the given path or create it if it does not exist.
    ///
    /// If the file does exist but does not correspond to a valid database file,
    /// an error **should** be returned.
    fn read_or_create(p: &Path) -> Result<Self>;

    /// State of the meeting, [MeetingState::NotProcessed] if it is unknown
    fn check_meeting(&self, key: &str) -> Result<MeetingState>;

    /// Inform the database that the meeting video is at `output`.
    ///
    /// This overwrites any previous failure.
    fn set_completed(&self, key: &str, title: &str, output: &Path) -> Result<()>;

    /// Inform the database that the meeting could not be reconstructed.
    fn set_failed(&self, key: &str, failure: &FailureRecord) -> Result<()>;

    /// Every meeting whose last attempt failed
    fn failures(&self) -> Result<Vec<FailureRecord>>;

    /// Count the number of meetings in the database.
    ///
    /// If a filter is specified, only count those that are completed (`true`)
    /// or not (`false`).
    fn count_meetings(&self, completed: Option<bool>) -> Result<usize>;
}
