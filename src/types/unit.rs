use std::{fmt::Display, path::PathBuf};

use crate::{outside::Request, result::FetchError};

/// Stable identifier of a unit: `{manifest_id}/unit_{index}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(owner: &str, index: usize) -> Self {
        Self(format!("{owner}/unit_{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a unit can be retrieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocator {
    /// A plain HTTP request whose body is the unit
    Http(Request),
    /// A stream only the media tool can read (e.g. `mmsh://`)
    MediaStream { url: String },
}

impl Display for ResourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLocator::Http(req) => write!(f, "{}", req.url),
            ResourceLocator::MediaStream { url } => write!(f, "{url}"),
        }
    }
}

/// What a vendor adapter plans for one unit, before it gets a place on disk
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDescriptor {
    pub index: usize,
    /// Remote resource of the unit, in the vendor's own notation
    pub resource: String,
    pub expected_size: Option<u64>,
    /// Identifier of the shared stream this unit downloads, if any
    pub shared_stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Pending,
    InProgress,
    Done,
    Failed(FetchError),
}

/// Smallest downloadable thing: one clip or one shared stream
#[derive(Debug, Clone)]
pub struct FetchUnit {
    pub id: UnitId,
    pub index: usize,
    pub locator: ResourceLocator,
    pub path: PathBuf,
    pub expected_size: Option<u64>,
    pub status: UnitStatus,
    pub attempts: u32,
}

impl FetchUnit {
    pub fn new(
        id: UnitId,
        index: usize,
        locator: ResourceLocator,
        path: PathBuf,
        expected_size: Option<u64>,
    ) -> Self {
        Self {
            id,
            index,
            locator,
            path,
            expected_size,
            status: UnitStatus::Pending,
            attempts: 0,
        }
    }

    /// Where the unit is written while downloading
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UnitStatus::Done | UnitStatus::Failed(_))
    }

    /// Only a pending unit can start
    pub fn start(&mut self) -> bool {
        if self.status == UnitStatus::Pending {
            self.status = UnitStatus::InProgress;
            true
        } else {
            false
        }
    }

    pub fn finish(&mut self, result: std::result::Result<(), FetchError>) {
        debug_assert_eq!(self.status, UnitStatus::InProgress);
        self.status = match result {
            Ok(()) => UnitStatus::Done,
            Err(err) => UnitStatus::Failed(err),
        };
    }

    /// Allow a terminal unit to be attempted again
    pub fn reset(&mut self) {
        self.status = UnitStatus::Pending;
        self.attempts = 0;
    }
}

/// Ordered units to download. Order only matters for reconstruction.
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    pub units: Vec<FetchUnit>,
}

impl FetchPlan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Merge another plan, skipping units already planned at the same path
    pub fn merge(&mut self, other: FetchPlan) {
        for unit in other.units {
            if !self.units.iter().any(|u| u.path == unit.path) {
                self.units.push(unit);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub done: Vec<FetchUnit>,
    pub failed: Vec<FetchUnit>,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
