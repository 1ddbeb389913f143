use std::{
    ffi::OsStr,
    fmt::Debug,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::types::Extension;

use super::command::{
    assert_success_command, Capture, CommandError, FFMPEG, FFPROBE, FFXXX_DEFAULT_ARGS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("could not understand {program} output: {reason}")]
    Parse { program: String, reason: String },

    #[error("could not prepare the command input: {0}")]
    Io(String),
}

/// Whether the media data is copied as-is or decoded and encoded again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    Copy,
    Reencode,
}

/// Codec parameters of one stream of a media file.
/// Two files can be concatenated without re-encoding only if these match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct StreamParams {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Seconds
    pub duration: f64,
    pub streams: Vec<StreamParams>,
}

/// One entry of a concatenation: a file and the duration it should last
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatEntry {
    pub path: PathBuf,
    pub duration: f64,
}

/// Interface of the external media-processing program
pub trait MediaTool: Sync + Debug {
    /// Get the duration and codec parameters of a media file
    fn probe(&self, path: &Path) -> Result<MediaInfo, ToolError>;

    /// Concatenate the entries, in order, into the output file
    fn concat(&self, entries: &[ConcatEntry], output: &Path, mode: EncodeMode)
        -> Result<(), ToolError>;

    /// Extract `duration` seconds starting at `start` seconds of the input
    fn extract(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        mode: EncodeMode,
    ) -> Result<(), ToolError>;

    /// Record a stream only the tool can read into the output file
    fn capture_stream(&self, url: &str, output: &Path, timeout: Duration)
        -> Result<(), ToolError>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) and ffprobe programs
#[derive(Debug)]
pub struct Ffmpeg {
    timeout: Duration,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` and `ffprobe` binaries are reachable
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        let check = Duration::from_secs(30);
        assert_success_command(FFMPEG, |cmd| cmd.arg("-version"), Capture::empty(), check)?;
        assert_success_command(FFPROBE, |cmd| cmd.arg("-version"), Capture::empty(), check)?;

        Ok(Self { timeout })
    }
}

impl MediaTool for Ffmpeg {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ToolError> {
        let res = assert_success_command(
            FFPROBE,
            |cmd| {
                cmd.args(FFXXX_DEFAULT_ARGS)
                    .args(["-of", "json"])
                    .arg("-show_format")
                    .arg("-show_streams")
                    .arg(path.as_os_str())
            },
            Capture::STDOUT,
            self.timeout,
        )?;

        parse_probe_output(&String::from_utf8_lossy(&res.stdout))
    }

    fn concat(
        &self,
        entries: &[ConcatEntry],
        output: &Path,
        mode: EncodeMode,
    ) -> Result<(), ToolError> {
        // The list must outlive the command, it is removed at drop
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let mut list = tempfile::Builder::new()
            .prefix("_concat")
            .suffix(".txt")
            .tempfile_in(dir)
            .map_err(|err| ToolError::Io(err.to_string()))?;
        list.write_all(concat_list(entries).as_bytes())
            .and_then(|_| list.flush())
            .map_err(|err| ToolError::Io(err.to_string()))?;

        let ext = Extension::from_path(output).unwrap_or(Extension::Mp4);
        assert_success_command(
            FFMPEG,
            |cmd| {
                cmd.args(FFXXX_DEFAULT_ARGS)
                    .arg("-y")
                    .args(["-f", "concat", "-safe", "0"])
                    .args([OsStr::new("-i"), list.path().as_os_str()])
                    .args(["-map", "0"])
                    .args(["-map_metadata", "-1"])
                    .args(encode_args(mode, ext))
                    .args(["-fflags", "+bitexact"])
                    .arg("--")
                    .arg(output)
            },
            Capture::empty(),
            self.timeout,
        )?;
        Ok(())
    }

    fn extract(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
        mode: EncodeMode,
    ) -> Result<(), ToolError> {
        let ext = Extension::from_path(output).unwrap_or(Extension::Mp4);
        assert_success_command(
            FFMPEG,
            |cmd| {
                cmd.args(FFXXX_DEFAULT_ARGS)
                    .arg("-y")
                    // Input seeking: fast, and exact when re-encoding
                    .args(["-ss", &format!("{start:.3}")])
                    .args([OsStr::new("-i"), input.as_os_str()])
                    .args(["-t", &format!("{duration:.3}")])
                    .args(["-map", "0"])
                    .args(["-map_metadata", "-1"])
                    .args(encode_args(mode, ext))
                    .args(["-avoid_negative_ts", "make_zero"])
                    .arg("--")
                    .arg(output)
            },
            Capture::empty(),
            self.timeout,
        )?;
        Ok(())
    }

    fn capture_stream(
        &self,
        url: &str,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        // The output is always a partial file, force the container format
        let ext = Extension::from_path(output.with_extension("")).unwrap_or(Extension::Wmv);
        let format = match ext {
            Extension::Wmv => "asf",
            Extension::Mp4 => "mp4",
            Extension::Ts => "mpegts",
        };
        assert_success_command(
            FFMPEG,
            |cmd| {
                cmd.args(FFXXX_DEFAULT_ARGS)
                    .arg("-y")
                    .args(["-i", url])
                    .args(["-c", "copy"])
                    .args(["-f", format])
                    .arg("--")
                    .arg(output)
            },
            Capture::empty(),
            timeout,
        )?;
        Ok(())
    }
}

/// Codec arguments for the given mode and output container
fn encode_args(mode: EncodeMode, ext: Extension) -> Vec<&'static str> {
    match (mode, ext) {
        (EncodeMode::Copy, _) => vec!["-c", "copy"],
        (EncodeMode::Reencode, Extension::Wmv) => {
            vec!["-c:v", "wmv2", "-q:v", "3", "-c:a", "wmav2", "-b:a", "128k"]
        }
        (EncodeMode::Reencode, _) => vec![
            "-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-c:a", "aac", "-b:a",
            "128k", "-flags:v", "+bitexact", "-flags:a", "+bitexact",
        ],
    }
}

/// Build an ffconcat list.
///
/// Durations are explicit instead of letting ffmpeg infer them,
/// otherwise the error accumulates and the video lengthens over time.
pub fn concat_list(entries: &[ConcatEntry]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for entry in entries {
        let path = entry.path.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{path}'\nduration {:.3}\n", entry.duration));
    }
    list
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<StreamParams>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn parse_probe_output(output: &str) -> Result<MediaInfo, ToolError> {
    let parse_err = |reason: String| ToolError::Parse {
        program: FFPROBE.to_owned(),
        reason,
    };

    let probe: ProbeOutput =
        serde_json::from_str(output).map_err(|err| parse_err(err.to_string()))?;
    let duration = probe
        .format
        .duration
        .ok_or_else(|| parse_err("no duration in format section".to_owned()))?
        .parse()
        .map_err(|err: std::num::ParseFloatError| parse_err(err.to_string()))?;

    Ok(MediaInfo {
        duration,
        streams: probe.streams,
    })
}
