//! In-memory stand-ins for the network and the media tool.
//!
//! Fake media files are small text files `duration=<secs>;codec=<name>`,
//! which is all the reconstruction logic needs to look at.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::{
    outside::{
        CommandError, ConcatEntry, EncodeMode, MediaInfo, MediaTool, Request, StreamParams,
        ToolError, Transport,
    },
    result::FetchError,
    utils::CancelToken,
};

pub fn write_media(path: &Path, duration: f64, codec: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("duration={duration};codec={codec}")).unwrap();
}

pub fn read_media(path: &Path) -> Option<(f64, String)> {
    let content = fs::read_to_string(path).ok()?;
    let (duration, codec) = content.split_once(';')?;
    let duration = duration.strip_prefix("duration=")?.parse().ok()?;
    let codec = codec.strip_prefix("codec=")?.to_owned();
    Some((duration, codec))
}

fn failed(reason: &str) -> ToolError {
    ToolError::Command(CommandError::Failed {
        program: "fake".to_owned(),
        status: "exit status: 1".to_owned(),
        stderr: reason.to_owned(),
    })
}

#[derive(Debug, Default)]
pub struct FakeMedia {
    streams: Mutex<HashMap<String, f64>>,
    /// Copy cuts land this many seconds off the requested duration
    pub inexact_copy_cut: Mutex<Option<f64>>,
    pub refuse_copy_cut: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn add_stream(&self, url: &str, duration: f64) {
        self.streams.lock().unwrap().insert(url.to_owned(), duration);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MediaTool for FakeMedia {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ToolError> {
        let (duration, codec) = read_media(path).ok_or_else(|| ToolError::Parse {
            program: "fake".to_owned(),
            reason: format!("{} is not media", path.display()),
        })?;
        Ok(MediaInfo {
            duration,
            streams: vec![StreamParams {
                codec_type: Some("video".to_owned()),
                codec_name: Some(codec),
                width: Some(640),
                height: Some(360),
                sample_rate: None,
                channels: None,
            }],
        })
    }

    fn concat(
        &self,
        entries: &[ConcatEntry],
        output: &Path,
        mode: EncodeMode,
    ) -> Result<(), ToolError> {
        self.record(format!("concat:{mode:?}:{}", entries.len()));
        let mut codecs = vec![];
        for entry in entries {
            let (_, codec) = read_media(&entry.path).ok_or_else(|| failed("bad input"))?;
            codecs.push(codec);
        }
        codecs.dedup();
        let codec = match mode {
            EncodeMode::Copy if codecs.len() > 1 => return Err(failed("codec mismatch")),
            EncodeMode::Copy => codecs.pop().unwrap_or_default(),
            EncodeMode::Reencode => "h264".to_owned(),
        };
        let duration = entries.iter().map(|e| e.duration).sum();
        write_media(output, duration, &codec);
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
        self.record(format!("extract:{mode:?}:{start}:{duration}"));
        let (total, codec) = read_media(input).ok_or_else(|| failed("bad input"))?;
        if start >= total {
            return Err(failed("seek beyond end of stream"));
        }
        let mut produced = duration.min(total - start);
        if mode == EncodeMode::Copy {
            if self.refuse_copy_cut.load(Ordering::SeqCst) {
                return Err(failed("cannot cut at this offset"));
            }
            if let Some(off) = *self.inexact_copy_cut.lock().unwrap() {
                produced += off;
            }
        }
        write_media(output, produced, &codec);
        Ok(())
    }

    fn capture_stream(
        &self,
        url: &str,
        output: &Path,
        _timeout: Duration,
    ) -> Result<(), ToolError> {
        self.record(format!("capture:{url}"));
        let duration = *self
            .streams
            .lock()
            .unwrap()
            .get(url)
            .ok_or_else(|| failed("stream not found"))?;
        write_media(output, duration, "wmv3");
        Ok(())
    }
}

/// Serves pages and bodies from memory and counts requests
#[derive(Debug, Default)]
pub struct FakeTransport {
    bodies: Mutex<HashMap<String, Vec<Result<Vec<u8>, FetchError>>>>,
    pages: Mutex<HashMap<String, String>>,
    requests: AtomicUsize,
}

impl FakeTransport {
    /// Answers for one URL, one per request, the last one repeating
    pub fn serve(&self, url: &str, answers: Vec<Result<Vec<u8>, FetchError>>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_owned(), answers);
    }

    /// Text page for a URL. The key may include the query string (`url?k=v&k2=v2`)
    pub fn page(&self, key: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(key.to_owned(), body.to_owned());
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn request_key(request: &Request) -> String {
    let params: Vec<String> = request
        .query
        .iter()
        .chain(&request.form)
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{}?{}", request.url, params.join("&"))
}

impl Transport for FakeTransport {
    fn fetch_text(&self, request: &Request) -> Result<String, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let pages = self.pages.lock().unwrap();
        pages
            .get(&request_key(request))
            .or_else(|| pages.get(&request.url))
            .cloned()
            .ok_or(FetchError::Status(404))
    }

    fn download(
        &self,
        request: &Request,
        dest: &Path,
        _cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let answer = {
            let mut bodies = self.bodies.lock().unwrap();
            let answers = bodies
                .get_mut(&request.url)
                .ok_or(FetchError::Status(404))?;
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            }
        };
        let body = answer?;
        fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}
