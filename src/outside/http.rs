use std::{
    fmt::Debug,
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};

use reqwest::blocking::Client;
use tracing::trace;

use crate::{result::FetchError, utils::CancelToken};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request template, built by the vendor adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: vec![],
            form: vec![],
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_owned(), value.into()));
        self
    }

    pub fn form(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.push((key.to_owned(), value.into()));
        self
    }
}

/// Interface for retrieving remote resources
pub trait Transport: Sync + Debug {
    /// Get the body of the response as text
    fn fetch_text(&self, request: &Request) -> Result<String, FetchError>;

    /// Write the body of the response to `dest` and return its size.
    ///
    /// A body shorter than the announced `Content-Length` is an error.
    fn download(
        &self,
        request: &Request,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, FetchError>;
}

/// Blocking HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn send(&self, request: &Request) -> Result<reqwest::blocking::Response, FetchError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        trace!("{:?} {}", request.method, request.url);
        let resp = builder.send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp)
    }
}

impl Transport for HttpClient {
    fn fetch_text(&self, request: &Request) -> Result<String, FetchError> {
        Ok(self.send(request)?.text()?)
    }

    fn download(
        &self,
        request: &Request,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        let mut resp = self.send(request)?;
        let announced = resp.content_length();

        let mut out = BufWriter::new(File::create(dest)?);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let n = resp
                .read(&mut buf)
                .map_err(|err| FetchError::Body(err.to_string()))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            written += n as u64;
        }
        out.flush()?;

        match announced {
            Some(expected) if expected != written => Err(FetchError::Body(format!(
                "received {written} of {expected} announced bytes"
            ))),
            _ => Ok(written),
        }
    }
}
