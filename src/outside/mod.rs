mod command;
mod ffmpeg;
mod http;

pub use command::CommandError;
pub use ffmpeg::{ConcatEntry, EncodeMode, Ffmpeg, MediaInfo, MediaTool, StreamParams, ToolError};
pub use http::{HttpClient, Request, Transport};
