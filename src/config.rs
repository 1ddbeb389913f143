use std::{path::Path, path::PathBuf, time::Duration};

use config::{Config, Environment, File, FileFormat};
use miette::{miette, Context, IntoDiagnostic, Result};
use serde::Deserialize;

use crate::{fetcher::RetryPolicy, types::VendorKind};

/// Prefix of the environment variables overriding the configuration file,
/// e.g. `CIVICREC_FETCH__WORKERS=4`
const ENV_PREFIX: &str = "CIVICREC";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the deterministic scratch tree holding downloaded units
    pub scratch_root: PathBuf,
    /// Where reconstructed videos are written
    pub output_dir: PathBuf,
    /// Processing state database
    pub database: PathBuf,
    pub fetch: FetchSettings,
    pub reconstruct: ReconstructSettings,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Number of concurrent downloads
    pub workers: usize,
    /// Attempts per unit, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Limit for recording a whole shared stream
    pub stream_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconstructSettings {
    /// Number of meetings reconstructed at the same time
    pub workers: usize,
    /// Number of re-encodes allowed at the same time, they are CPU-bound
    pub encode_slots: usize,
    /// Missing footage of at least this many seconds aborts the meeting
    pub max_gap_secs: f64,
    /// Meetings shorter than this are considered wrong timecodes
    pub min_duration_secs: u64,
    /// Meetings longer than this are considered wrong timecodes
    pub max_duration_secs: u64,
    /// Allowed difference between requested and produced durations
    pub duration_tolerance_secs: f64,
    /// Seconds kept before and after a splice
    pub splice_padding_secs: u64,
    pub tool_timeout_secs: u64,
    /// Keep shared streams once every meeting of it has been spliced
    pub keep_shared_streams: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub vendor: VendorKind,
    /// Vendor page used for discovery
    pub url: String,
    /// Time zone name passed to the vendor
    #[serde(default = "default_tz")]
    pub tz: String,
}

fn default_tz() -> String {
    "America/Vancouver".to_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("segments"),
            output_dir: PathBuf::from("videos"),
            database: PathBuf::from("civicrec.sqlite"),
            fetch: FetchSettings::default(),
            reconstruct: ReconstructSettings::default(),
            channels: vec![],
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            request_timeout_secs: 60,
            stream_timeout_secs: 6 * 60 * 60,
        }
    }
}

impl Default for ReconstructSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            encode_slots: 1,
            max_gap_secs: 10.0,
            min_duration_secs: 30,
            max_duration_secs: 12 * 60 * 60,
            duration_tolerance_secs: 2.0,
            splice_padding_secs: 2,
            tool_timeout_secs: 4 * 60 * 60,
            keep_shared_streams: true,
        }
    }
}

impl Settings {
    /// Load the settings from the TOML file then the environment.
    ///
    /// A missing file is only an error if `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not read configuration {}", path.display()))?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")
    }

    #[cfg(test)]
    pub fn from_toml(content: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .into_diagnostic()?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")
    }

    pub fn channel(&self, id: &str) -> Result<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id).ok_or_else(|| {
            miette!(
                "Channel '{id}' not found in the configuration. Known channels: {}",
                self.channels
                    .iter()
                    .map(|c| c.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

impl FetchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: true,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

impl ReconstructSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let settings = Settings::from_toml(indoc! {r#"
            scratch_root = "/tmp/segments"

            [fetch]
            workers = 16

            [[channels]]
            id = "surrey"
            vendor = "neulion"
            url = "http://civic.neulion.com/cityofsurrey/"
        "#})
        .unwrap();

        assert_eq!(settings.scratch_root, PathBuf::from("/tmp/segments"));
        assert_eq!(settings.fetch.workers, 16);
        assert_eq!(settings.fetch.max_attempts, 4);
        assert_eq!(settings.reconstruct.max_gap_secs, 10.0);

        let channel = settings.channel("surrey").unwrap();
        assert_eq!(channel.vendor, VendorKind::Neulion);
        assert_eq!(channel.tz, "America/Vancouver");
        assert!(settings.channel("burnaby").is_err());
    }

    #[test]
    fn unknown_vendor_is_rejected() {
        let res = Settings::from_toml(indoc! {r#"
            [[channels]]
            id = "x"
            vendor = "youtube"
            url = "http://example.org"
        "#});
        assert!(res.is_err());
    }
}
