//! Turn the downloaded units of a meeting into one playable file.
//!
//! Segment-based meetings are concatenated, stream-based meetings are
//! spliced out of their shared stream.

mod concat;
mod shared;
mod splice;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

pub use shared::{SharedStream, SharedStreams};

use crate::{
    actors::MeetingJob,
    config::ReconstructSettings,
    io::write_json,
    outside::{MediaInfo, MediaTool, ToolError},
    result::{Error, Result},
    types::{sanitize_id, Extension, MeetingManifest, MeetingSource, ReconstructedVideo},
};

#[derive(Debug, Clone)]
pub struct ReconstructOptions {
    pub output_dir: PathBuf,
    /// Seconds of missing footage that abort a concatenation
    pub max_gap: f64,
    pub tolerance: f64,
    pub min_duration: u64,
    pub max_duration: u64,
    pub padding: u64,
}

impl ReconstructOptions {
    pub fn new(output_dir: impl Into<PathBuf>, settings: &ReconstructSettings) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_gap: settings.max_gap_secs,
            tolerance: settings.duration_tolerance_secs,
            min_duration: settings.min_duration_secs,
            max_duration: settings.max_duration_secs,
            padding: settings.splice_padding_secs,
        }
    }

    /// `{output_dir}/{channel}/{date}_{manifest_id}.{ext}`
    pub fn output_path(&self, manifest: &MeetingManifest) -> PathBuf {
        let ext = if manifest.vendor.is_stream_based() {
            manifest.vendor.unit_extension()
        } else {
            Extension::Mp4
        };
        self.output_dir.join(sanitize_id(&manifest.channel)).join(format!(
            "{}_{}{}",
            manifest.date,
            manifest.id(),
            ext.with_dot()
        ))
    }
}

/// Sidecar describing the video, next to it
pub fn sidecar_path(video: &Path) -> PathBuf {
    video.with_extension("json")
}

/// Bounds the number of re-encodes running at the same time
#[derive(Debug)]
struct EncodeSlots {
    give: Sender<()>,
    take: Receiver<()>,
}

struct EncodeSlot<'a>(&'a EncodeSlots);

impl EncodeSlots {
    fn new(count: usize) -> Self {
        let count = count.max(1);
        let (give, take) = bounded(count);
        for _ in 0..count {
            let _ = give.send(());
        }
        Self { give, take }
    }

    fn acquire(&self) -> EncodeSlot<'_> {
        // Both ends live in self, recv cannot fail
        let _ = self.take.recv();
        EncodeSlot(self)
    }
}

impl Drop for EncodeSlot<'_> {
    fn drop(&mut self) {
        let _ = self.0.give.send(());
    }
}

#[derive(Debug)]
pub struct Reconstructor<'a> {
    media: &'a dyn MediaTool,
    options: ReconstructOptions,
    slots: EncodeSlots,
}

impl<'a> Reconstructor<'a> {
    pub fn new(media: &'a dyn MediaTool, options: ReconstructOptions, encode_slots: usize) -> Self {
        Self {
            media,
            options,
            slots: EncodeSlots::new(encode_slots),
        }
    }

    /// Build the meeting video and its sidecar.
    ///
    /// Nothing is left at the output path on failure.
    pub fn reconstruct(&self, job: &MeetingJob) -> Result<ReconstructedVideo> {
        let manifest = &job.manifest;
        manifest.validate()?;

        let output = self.options.output_path(manifest);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        info!("Reconstructing {manifest}");
        let video = match &manifest.source {
            MeetingSource::Clips { ranges } => {
                concat::concatenate(self, manifest, ranges, &job.units, &output)?
            }
            MeetingSource::Stream { splice } => {
                let unit = job.units.first().ok_or_else(|| {
                    Error::reconstruction(&manifest.id(), "no unit holds the shared stream")
                })?;
                let stream = match &job.stream {
                    Some(stream) => Arc::clone(stream),
                    None => Arc::new(SharedStream::new(&splice.stream_id, &unit.path, true)),
                };
                splice::splice(self, manifest, splice, unit, &stream, &output).map_err(
                    |err| {
                        stream.retain();
                        err
                    },
                )?
            }
        };

        write_json(&sidecar_path(&output), &video)?;
        info!(
            "Meeting {} reconstructed into {} ({:.1}s)",
            manifest.id(),
            output.display(),
            video.duration
        );
        Ok(video)
    }

    fn probe(&self, path: &Path) -> std::result::Result<MediaInfo, ToolError> {
        debug!("Probing {}", path.display());
        self.media.probe(path)
    }

    /// Run a re-encode once a slot is free
    fn reencode<T>(&self, f: impl FnOnce() -> T) -> T {
        let _slot = self.slots.acquire();
        f()
    }
}

/// Temporary output of a tool, moved to its destination once complete
fn publish(tmp: &Path, output: &Path) -> Result<()> {
    fs::rename(tmp, output)?;
    Ok(())
}
