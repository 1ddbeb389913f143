use std::path::Path;

use serde::{Deserialize, Serialize};

/// Container format of downloaded units and reconstructed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Mp4,
    Ts,
    Wmv,
}

impl Extension {
    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            Extension::Mp4 => ".mp4",
            Extension::Ts => ".ts",
            Extension::Wmv => ".wmv",
        }
    }

    /// Parse the path file extension.
    /// Return None in case of no or invalid extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext {
                "mp4" => Some(Self::Mp4),
                "ts" => Some(Self::Ts),
                "wmv" => Some(Self::Wmv),
                _ => None,
            })
    }
}
