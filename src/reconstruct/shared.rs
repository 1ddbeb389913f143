use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, info};

use crate::{io::discard, types::FetchUnit};

/// Download of a stream shared by several meetings.
///
/// Every meeting spliced out of the stream holds an `Arc` on it. The
/// download is released when the last one is dropped, unless one of the
/// splices failed and will need it again.
#[derive(Debug)]
pub struct SharedStream {
    id: String,
    path: PathBuf,
    keep: bool,
    retained: AtomicBool,
}

impl SharedStream {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, keep: bool) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            keep,
            retained: AtomicBool::new(false),
        }
    }

    /// Keep the download once released
    pub fn retain(&self) {
        self.retained.store(true, Ordering::SeqCst);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedStream {
    fn drop(&mut self) {
        if self.keep {
            debug!("Every meeting of stream '{}' is spliced", self.id);
        } else if self.retained.load(Ordering::SeqCst) {
            info!(
                "Keeping stream '{}' for the meetings that could not be spliced",
                self.id
            );
        } else {
            info!("Every meeting of stream '{}' is spliced, removing it", self.id);
            discard(&self.path);
        }
    }
}

/// Hands out one handle per shared stream download
#[derive(Debug, Default)]
pub struct SharedStreams {
    keep: bool,
    streams: HashMap<PathBuf, Arc<SharedStream>>,
}

impl SharedStreams {
    pub fn new(keep: bool) -> Self {
        Self {
            keep,
            streams: HashMap::new(),
        }
    }

    /// Handle on the stream downloaded by `unit`, shared with every
    /// other meeting planned on the same file
    pub fn handle(&mut self, stream_id: &str, unit: &FetchUnit) -> Arc<SharedStream> {
        let keep = self.keep;
        self.streams
            .entry(unit.path.clone())
            .or_insert_with(|| Arc::new(SharedStream::new(stream_id, unit.path.clone(), keep)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
