use std::{collections::HashMap, path::Path};

use tracing::{debug, warn};

use crate::{
    io::{discard, temp_destination},
    outside::{ConcatEntry, EncodeMode, StreamParams},
    result::{Error, Result},
    types::{
        Chapter, ClipRange, FetchUnit, ManifestRef, MeetingManifest, ProvenanceNote,
        ReconstructedVideo, Timecode, UnitStatus,
    },
};

use super::{publish, Reconstructor};

/// Ranges closer than this are contiguous
const EPSILON: f64 = 1e-3;

/// Missing footage accumulated between two usable clips
#[derive(Debug, Default)]
struct Gap {
    /// Position in the output where it happens
    at: f64,
    duration: f64,
}

pub(super) fn concatenate(
    rec: &Reconstructor,
    manifest: &MeetingManifest,
    ranges: &[ClipRange],
    units: &[FetchUnit],
    output: &Path,
) -> Result<ReconstructedVideo> {
    let id = manifest.id();
    let by_index: HashMap<usize, &FetchUnit> = units.iter().map(|u| (u.index, u)).collect();

    let mut ranges: Vec<&ClipRange> = ranges.iter().collect();
    ranges.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut entries: Vec<ConcatEntry> = vec![];
    let mut params: Vec<Vec<StreamParams>> = vec![];
    let mut used = vec![];
    let mut notes = vec![];
    let mut gap = Gap::default();
    let mut cursor = 0.0;
    let mut produced = 0.0;

    for range in ranges {
        if range.start > cursor + EPSILON {
            gap.duration += range.start - cursor;
        }
        cursor = range.end;

        let Some(unit) = by_index.get(&range.index).copied().filter(|u| usable(u)) else {
            debug!("Clip {} of {id} is missing", range.index);
            gap.duration += range.duration();
            continue;
        };
        let info = match rec.probe(&unit.path) {
            Ok(info) => info,
            Err(err) => {
                warn!("Clip {} of {id} is unreadable, skipping it: {err}", unit.id);
                gap.duration += range.duration();
                continue;
            }
        };

        bridge(rec, &id, &mut gap, &mut notes)?;
        produced += range.duration();
        gap.at = produced;

        entries.push(ConcatEntry {
            path: unit.path.clone(),
            duration: range.duration(),
        });
        params.push(info.streams);
        used.push(unit.id.to_string());
    }
    bridge(rec, &id, &mut gap, &mut notes)?;

    if entries.is_empty() {
        return Err(Error::reconstruction(&id, "none of the clips is available"));
    }

    let tmp = temp_destination(output);
    let uniform = params.windows(2).all(|pair| pair[0] == pair[1]);
    let copied = if uniform {
        rec.media
            .concat(&entries, &tmp, EncodeMode::Copy)
            .map_err(|err| warn!("Copy concatenation of {id} failed, re-encoding: {err}"))
            .is_ok()
    } else {
        warn!("Clips of {id} have different codec parameters, re-encoding");
        false
    };

    if !copied {
        discard(&tmp);
        notes.push(ProvenanceNote::ReencodedConcat);
        rec.reencode(|| rec.media.concat(&entries, &tmp, EncodeMode::Reencode))
            .map_err(|err| {
                discard(&tmp);
                Error::reconstruction(&id, err)
            })?;
    }

    let duration = match rec.probe(&tmp) {
        Ok(info) => info.duration,
        Err(err) => {
            discard(&tmp);
            return Err(Error::reconstruction(&id, format!("unreadable output: {err}")));
        }
    };
    publish(&tmp, output)?;

    Ok(ReconstructedVideo {
        path: output.to_owned(),
        manifest: ManifestRef::from(manifest),
        duration,
        units: used,
        chapters: shift_chapters(&manifest.chapters, &notes),
        notes,
    })
}

/// Move the chapters back by the footage bridged before them
fn shift_chapters(chapters: &[Chapter], notes: &[ProvenanceNote]) -> Vec<Chapter> {
    // Bridged gaps as (meeting time, duration), from output positions
    let mut dropped = 0.0;
    let gaps: Vec<(f64, f64)> = notes
        .iter()
        .filter_map(|note| match note {
            ProvenanceNote::BridgedGap { at, duration } => {
                let since = at + dropped;
                dropped += duration;
                Some((since, *duration))
            }
            _ => None,
        })
        .collect();

    chapters
        .iter()
        .map(|chapter| {
            let offset = chapter.offset.as_secs_f64();
            let shift: f64 = gaps
                .iter()
                .filter(|(since, _)| *since < offset)
                .map(|(since, duration)| duration.min(offset - since))
                .sum();
            Chapter {
                offset: Timecode::from_secs((offset - shift).max(0.0).round() as u64),
                title: chapter.title.clone(),
            }
        })
        .collect()
}

fn usable(unit: &FetchUnit) -> bool {
    unit.status == UnitStatus::Done && unit.path.is_file()
}

/// Accept the pending gap if it is short enough
fn bridge(
    rec: &Reconstructor,
    id: &str,
    gap: &mut Gap,
    notes: &mut Vec<ProvenanceNote>,
) -> Result<()> {
    if gap.duration <= EPSILON {
        gap.duration = 0.0;
        return Ok(());
    }
    if gap.duration >= rec.options.max_gap {
        return Err(Error::reconstruction(
            id,
            format!(
                "{:.1}s of footage missing at {:.1}s, the limit is {:.1}s",
                gap.duration, gap.at, rec.options.max_gap
            ),
        ));
    }

    warn!("Bridging {:.1}s of missing footage at {:.1}s of {id}", gap.duration, gap.at);
    notes.push(ProvenanceNote::BridgedGap {
        at: gap.at,
        duration: gap.duration,
    });
    gap.duration = 0.0;
    Ok(())
}
