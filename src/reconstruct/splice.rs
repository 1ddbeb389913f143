use std::path::Path;

use tracing::warn;

use crate::{
    io::{discard, temp_destination},
    outside::EncodeMode,
    result::{Error, Result},
    types::{
        Chapter, FetchUnit, ManifestRef, MeetingManifest, ProvenanceNote, ReconstructedVideo,
        StreamSplice, Timecode, UnitStatus,
    },
};

use super::{publish, Reconstructor, SharedStream};

pub(super) fn splice(
    rec: &Reconstructor,
    manifest: &MeetingManifest,
    splice: &StreamSplice,
    unit: &FetchUnit,
    stream: &SharedStream,
    output: &Path,
) -> Result<ReconstructedVideo> {
    let id = manifest.id();
    if let UnitStatus::Failed(err) = &unit.status {
        return Err(Error::Fetch {
            unit: unit.id.to_string(),
            source: err.clone(),
        });
    }

    let total = rec
        .probe(stream.path())
        .map_err(|err| {
            Error::reconstruction(&id, format!("shared stream '{}' unreadable: {err}", stream.id()))
        })?
        .duration;
    check_timecodes(rec, &id, splice, total)?;

    let opts = &rec.options;
    let before = opts.padding.min(splice.start.as_secs());
    let room_after = (total - splice.end.as_secs_f64()).max(0.0).floor() as u64;
    let after = opts.padding.min(room_after);
    let start = splice.start.shift(-(before as i64));
    let end = (splice.end.as_secs_f64() + after as f64).min(total);
    let wanted = end - start.as_secs_f64();

    let tmp = temp_destination(output);
    let mut notes = vec![];
    let within = |produced: f64| (produced - wanted).abs() <= opts.tolerance;

    let copied = match rec
        .media
        .extract(stream.path(), &tmp, start.as_secs_f64(), wanted, EncodeMode::Copy)
        .map_err(|err| err.to_string())
        .and_then(|()| rec.probe(&tmp).map_err(|err| err.to_string()))
    {
        Ok(info) if within(info.duration) => Some(info.duration),
        Ok(info) => {
            warn!(
                "Copy cut of {id} lasts {:.1}s instead of {wanted:.1}s, re-encoding",
                info.duration
            );
            None
        }
        Err(err) => {
            warn!("Copy cut of {id} failed, re-encoding: {err}");
            None
        }
    };

    let duration = match copied {
        Some(duration) => duration,
        None => {
            discard(&tmp);
            notes.push(ProvenanceNote::ReencodedSplice);
            let encoded = rec
                .reencode(|| {
                    rec.media.extract(
                        stream.path(),
                        &tmp,
                        start.as_secs_f64(),
                        wanted,
                        EncodeMode::Reencode,
                    )
                })
                .map_err(|err| err.to_string())
                .and_then(|()| rec.probe(&tmp).map_err(|err| err.to_string()));
            match encoded {
                Ok(info) if within(info.duration) => info.duration,
                Ok(info) => {
                    discard(&tmp);
                    return Err(Error::timecode(
                        &id,
                        format!(
                            "cut from {start} lasts {:.1}s instead of {wanted:.1}s",
                            info.duration
                        ),
                    ));
                }
                Err(err) => {
                    discard(&tmp);
                    return Err(Error::timecode(&id, format!("cannot cut from {start}: {err}")));
                }
            }
        }
    };
    publish(&tmp, output)?;

    if before > 0 || after > 0 {
        notes.push(ProvenanceNote::Padded { before, after });
    }

    // Chapters are stream timecodes
    let chapters = manifest
        .chapters
        .iter()
        .map(|chapter| Chapter {
            offset: chapter.offset.relative_to(start),
            title: chapter.title.clone(),
        })
        .collect();

    Ok(ReconstructedVideo {
        path: output.to_owned(),
        manifest: ManifestRef::from(manifest),
        duration,
        units: vec![unit.id.to_string()],
        notes,
        chapters,
    })
}

/// Reject splices that cannot match the stream they come from
fn check_timecodes(rec: &Reconstructor, id: &str, splice: &StreamSplice, total: f64) -> Result<()> {
    let opts = &rec.options;
    let stream_end = Timecode::from_secs(total.floor() as u64);

    if splice.start.as_secs_f64() >= total {
        return Err(Error::timecode(
            id,
            format!("starts at {} but the stream ends at {stream_end}", splice.start),
        ));
    }
    if splice.end.as_secs_f64() > total + opts.tolerance {
        return Err(Error::timecode(
            id,
            format!("ends at {} but the stream ends at {stream_end}", splice.end),
        ));
    }
    let duration = splice.duration();
    if duration < opts.min_duration {
        return Err(Error::timecode(
            id,
            format!("lasts {duration}s, less than the minimum {}s", opts.min_duration),
        ));
    }
    if duration > opts.max_duration {
        return Err(Error::timecode(
            id,
            format!("lasts {duration}s, more than the maximum {}s", opts.max_duration),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::atomic::Ordering, sync::Arc};

    use time::macros::date;

    use super::*;
    use crate::{
        actors::MeetingJob,
        config::ReconstructSettings,
        reconstruct::{ReconstructOptions, Reconstructor},
        result::FetchError,
        testing::{write_media, FakeMedia},
        types::{MeetingSource, ResourceLocator, UnitId, VendorKind},
    };

    const MINUTE: u64 = 60;

    struct Meeting {
        _dir: tempfile::TempDir,
        output_dir: PathBuf,
        job: MeetingJob,
    }

    /// A meeting spliced from a stream lasting `stream_secs`
    fn meeting(stream_secs: f64, start: u64, end: u64) -> Meeting {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch/coq_20160111/unit_0.wmv");
        write_media(&path, stream_secs, "wmv3");

        let mut unit = FetchUnit::new(
            UnitId::new("coq_20160111", 0),
            0,
            ResourceLocator::MediaStream {
                url: "mmsh://example.org/coq_20160111.wmv".to_owned(),
            },
            path.clone(),
            None,
        );
        unit.start();
        unit.finish(Ok(()));

        let manifest = MeetingManifest {
            vendor: VendorKind::InsInc,
            channel: "coquitlam".to_owned(),
            date: date!(2016 - 01 - 11),
            native_id: format!("coq_20160111_{start}"),
            title: "Regular Council".to_owned(),
            category: Some("Council".to_owned()),
            chapters: vec![Chapter {
                offset: Timecode::from_secs(start + 5 * MINUTE),
                title: "Delegations".to_owned(),
            }],
            source: MeetingSource::Stream {
                splice: StreamSplice {
                    stream_id: "coq_20160111".to_owned(),
                    locator: "mms://example.org/coq_20160111.wmv".to_owned(),
                    start: Timecode::from_secs(start),
                    end: Timecode::from_secs(end),
                },
            },
        };
        Meeting {
            output_dir: dir.path().join("videos"),
            _dir: dir,
            job: MeetingJob {
                manifest,
                units: vec![unit],
                stream: Some(Arc::new(SharedStream::new("coq_20160111", path, true))),
            },
        }
    }

    fn reconstructor<'a>(media: &'a FakeMedia, meeting: &Meeting) -> Reconstructor<'a> {
        let settings = ReconstructSettings::default();
        Reconstructor::new(media, ReconstructOptions::new(&meeting.output_dir, &settings), 1)
    }

    #[test]
    fn splice_is_cut_with_padding() {
        let media = FakeMedia::default();
        let meeting = meeting(3600.0, 10 * MINUTE, 40 * MINUTE);
        let video = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap();

        assert!((video.duration - (30 * MINUTE + 4) as f64).abs() < 0.01);
        assert_eq!(video.notes, vec![ProvenanceNote::Padded { before: 2, after: 2 }]);
        assert_eq!(video.chapters[0].offset, Timecode::from_secs(5 * MINUTE + 2));
        assert_eq!(video.units, vec!["coq_20160111/unit_0"]);
        assert_eq!(video.path.extension().unwrap(), "wmv");
        assert_eq!(
            media.calls(),
            vec![format!("extract:Copy:{}:{}", 10 * MINUTE - 2, 30 * MINUTE + 4)]
        );
    }

    #[test]
    fn splice_beyond_stream_end_is_a_timecode_error() {
        let media = FakeMedia::default();
        let meeting = meeting((25 * MINUTE) as f64, 10 * MINUTE, 40 * MINUTE);
        let rec = reconstructor(&media, &meeting);
        let err = rec.reconstruct(&meeting.job).unwrap_err();

        assert!(matches!(err, Error::Timecode { .. }));
        assert!(!rec.options.output_path(&meeting.job.manifest).exists());
        assert!(media.calls().is_empty());
    }

    #[test]
    fn splice_starting_after_stream_end_is_a_timecode_error() {
        let media = FakeMedia::default();
        let meeting = meeting((25 * MINUTE) as f64, 30 * MINUTE, 40 * MINUTE);
        let err = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap_err();
        assert!(matches!(err, Error::Timecode { .. }));
    }

    #[test]
    fn implausibly_short_splice_is_a_timecode_error() {
        let media = FakeMedia::default();
        let meeting = meeting(3600.0, 10 * MINUTE, 10 * MINUTE + 5);
        let err = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap_err();
        assert!(matches!(err, Error::Timecode { .. }));
    }

    #[test]
    fn refused_copy_cut_falls_back_to_reencode() {
        let media = FakeMedia::default();
        media.refuse_copy_cut.store(true, Ordering::SeqCst);
        let meeting = meeting(3600.0, 10 * MINUTE, 40 * MINUTE);
        let video = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap();

        assert!(video.notes.contains(&ProvenanceNote::ReencodedSplice));
        assert!((video.duration - (30 * MINUTE + 4) as f64).abs() < 0.01);
    }

    #[test]
    fn inexact_copy_cut_falls_back_to_reencode() {
        let media = FakeMedia::default();
        *media.inexact_copy_cut.lock().unwrap() = Some(8.0);
        let meeting = meeting(3600.0, 10 * MINUTE, 40 * MINUTE);
        let video = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap();

        assert!(video.notes.contains(&ProvenanceNote::ReencodedSplice));
        assert_eq!(media.calls().len(), 2);
    }

    #[test]
    fn failed_stream_download_is_a_fetch_error() {
        let media = FakeMedia::default();
        let mut meeting = meeting(3600.0, 10 * MINUTE, 40 * MINUTE);
        let unit = &mut meeting.job.units[0];
        unit.reset();
        unit.start();
        unit.finish(Err(FetchError::Timeout));

        let err = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn padding_is_clamped_to_the_stream() {
        let media = FakeMedia::default();
        let meeting = meeting((40 * MINUTE) as f64, 1, 40 * MINUTE);
        let video = reconstructor(&media, &meeting)
            .reconstruct(&meeting.job)
            .unwrap();
        assert_eq!(video.notes, vec![ProvenanceNote::Padded { before: 1, after: 0 }]);
    }
}
