mod extension;
mod manifest;
mod timecode;
mod unit;
mod video;

pub use extension::Extension;
pub use manifest::{
    sanitize_id, Chapter, ClipRange, MeetingManifest, MeetingSource, StreamSplice, VendorKind,
};
pub use timecode::Timecode;
pub use unit::{
    FetchOutcome, FetchPlan, FetchUnit, ResourceLocator, UnitDescriptor, UnitId, UnitStatus,
};
pub use video::{
    FailureKind, FailureRecord, ManifestRef, ProvenanceNote, ReconstructedVideo, RunReport,
};
