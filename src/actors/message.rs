use std::sync::Arc;

use crate::{
    reconstruct::SharedStream,
    result::Error,
    types::{FetchUnit, MeetingManifest, ReconstructedVideo},
};

/// A meeting ready to be reconstructed from its downloaded units
#[derive(Debug)]
pub struct MeetingJob {
    pub manifest: MeetingManifest,
    /// Units in manifest order, failed ones included
    pub units: Vec<FetchUnit>,
    /// Handle on the shared stream of stream-based meetings
    pub stream: Option<Arc<SharedStream>>,
}

#[derive(Debug)]
pub struct MeetingResult {
    pub manifest: MeetingManifest,
    pub result: Result<ReconstructedVideo, Error>,
}
