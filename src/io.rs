use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use time::Date;
use tracing::{debug, warn};

use crate::{
    result::{Error, Result},
    types::{sanitize_id, Extension, MeetingManifest, VendorKind},
};

pub const MANIFEST_FILE: &str = "_manifest.json";

/// Deterministic scratch tree:
/// `{root}/{vendor}/{channel}/{date}/{owner}/unit_{index}{ext}`.
///
/// The owner is the manifest id, or the stream id for shared streams so that
/// every meeting of one stream resolves to the same download.
#[derive(Debug, Clone)]
pub struct ScratchLayout {
    root: PathBuf,
}

impl ScratchLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn date_dir(&self, vendor: VendorKind, channel: &str, date: Date) -> PathBuf {
        self.root
            .join(vendor.name())
            .join(sanitize_id(channel))
            .join(date.to_string())
    }

    pub fn owner_dir(&self, vendor: VendorKind, channel: &str, date: Date, owner: &str) -> PathBuf {
        self.date_dir(vendor, channel, date).join(sanitize_id(owner))
    }

    pub fn unit_path(
        &self,
        manifest: &MeetingManifest,
        owner: &str,
        index: usize,
        ext: Extension,
    ) -> PathBuf {
        self.owner_dir(manifest.vendor, &manifest.channel, manifest.date, owner)
            .join(format!("unit_{index}{}", ext.with_dot()))
    }

    pub fn manifest_path(&self, manifest: &MeetingManifest) -> PathBuf {
        self.owner_dir(manifest.vendor, &manifest.channel, manifest.date, &manifest.id())
            .join(MANIFEST_FILE)
    }

    /// Save the manifest next to its units
    pub fn save_manifest(&self, manifest: &MeetingManifest) -> Result<PathBuf> {
        let path = self.manifest_path(manifest);
        write_json(&path, manifest)?;
        Ok(path)
    }

    /// Read back every manifest saved for the date, ordered by id
    pub fn load_manifests(
        &self,
        vendor: VendorKind,
        channel: &str,
        date: Date,
    ) -> Result<Vec<MeetingManifest>> {
        let dir = self.date_dir(vendor, channel, date);
        if !dir.is_dir() {
            return Ok(vec![]);
        }

        let mut manifests = vec![];
        let mut entries: Vec<_> = fs::read_dir(&dir)?.flatten().map(|e| e.path()).collect();
        entries.sort();
        for entry in entries {
            let path = entry.join(MANIFEST_FILE);
            if path.is_file() {
                manifests.push(read_json(&path)?);
            }
        }
        Ok(manifests)
    }
}

/// Path used while producing `path`: `name.tmp.ext`
pub fn temp_destination(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => path.with_file_name(format!("{stem}.tmp.{}", ext.to_string_lossy())),
        None => path.with_file_name(format!("{stem}.tmp")),
    }
}

/// Remove a leftover file, logging instead of failing
pub fn discard(path: &Path) {
    if path.exists() {
        debug!("Discarding {}", path.display());
        if let Err(err) = fs::remove_file(path) {
            warn!("Could not remove {}: {err}", path.display());
        }
    }
}

/// Non-empty file of the expected size, if one is known
pub fn is_complete_file(path: &Path, expected_size: Option<u64>) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            expected_size.map_or(true, |expected| expected == meta.len())
        }
        _ => false,
    }
}

/// Write pretty JSON through a temporary file so readers never see half of it
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_destination(path);
    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| Error::Other(format!("Could not serialize {}: {err}", path.display())))?;
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content)
        .map_err(|err| Error::Other(format!("Could not parse {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::types::{MeetingSource, StreamSplice, Timecode};

    fn manifest(native_id: &str) -> MeetingManifest {
        MeetingManifest {
            vendor: VendorKind::InsInc,
            channel: "coquitlam".to_owned(),
            date: date!(2016 - 01 - 11),
            native_id: native_id.to_owned(),
            title: "Regular Council".to_owned(),
            category: Some("Council".to_owned()),
            chapters: vec![],
            source: MeetingSource::Stream {
                splice: StreamSplice {
                    stream_id: "coq_20160111".to_owned(),
                    locator: "mms://example.org/coq_20160111.wmv".to_owned(),
                    start: Timecode::from_secs(10),
                    end: Timecode::from_secs(100),
                },
            },
        }
    }

    #[test]
    fn unit_paths_are_deterministic() {
        let layout = ScratchLayout::new("/scratch");
        let m = manifest("coq_20160111_190000");
        assert_eq!(
            layout.unit_path(&m, &m.id(), 3, Extension::Mp4),
            PathBuf::from("/scratch/insinc/coquitlam/2016-01-11/coq_20160111_190000/unit_3.mp4")
        );
        assert_eq!(
            layout.unit_path(&m, "coq_20160111", 0, Extension::Wmv),
            PathBuf::from("/scratch/insinc/coquitlam/2016-01-11/coq_20160111/unit_0.wmv")
        );
    }

    #[test]
    fn temp_destination_inserts_tmp() {
        assert_eq!(
            temp_destination(Path::new("/v/a.mp4")),
            PathBuf::from("/v/a.tmp.mp4")
        );
        assert_eq!(temp_destination(Path::new("/v/a")), PathBuf::from("/v/a.tmp"));
    }

    #[test]
    fn manifests_round_trip_through_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ScratchLayout::new(dir.path());
        let first = manifest("b_meeting");
        let second = manifest("a_meeting");
        layout.save_manifest(&first).unwrap();
        layout.save_manifest(&second).unwrap();

        let loaded = layout
            .load_manifests(VendorKind::InsInc, "coquitlam", date!(2016 - 01 - 11))
            .unwrap();
        assert_eq!(loaded, vec![second, first]);

        let none = layout
            .load_manifests(VendorKind::InsInc, "coquitlam", date!(2016 - 01 - 12))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn complete_file_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit_0.mp4");
        assert!(!is_complete_file(&path, None));
        fs::File::create(&path).unwrap();
        assert!(!is_complete_file(&path, None));
        fs::write(&path, b"1234").unwrap();
        assert!(is_complete_file(&path, None));
        assert!(is_complete_file(&path, Some(4)));
        assert!(!is_complete_file(&path, Some(5)));
    }
}
