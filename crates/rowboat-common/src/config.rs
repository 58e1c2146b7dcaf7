use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Configuration for capturing and tabularizing the output of an external
/// interpreter process.
///
/// Values come from the bundled defaults, overridden by environment
/// variables prefixed with `ROWBOAT__` where `__` separates nested keys
/// (e.g. `ROWBOAT__PROCESS__PROGRAM`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// The character that separates cells within an output row.
    pub cell_separator: char,
    /// Whether the first output row of a dispatch is a header row rather
    /// than data.
    pub skip_first_line: bool,
    /// Whether a change in row width starts a new table.
    pub multi_table: bool,
    /// Upper bound on captured rows per dispatch, counting the header row.
    /// Zero means unbounded.
    pub max_rows: usize,
    /// Label of the character encoding used to decode process output.
    pub encoding: String,
    /// How long a stream may stay silent before it is considered complete.
    pub quiet_period_ms: u64,
    /// How often the stream watcher wakes up while waiting for output.
    pub poll_interval_ms: u64,
    /// Capacity of the per-stream line queues.
    pub queue_capacity: usize,
    /// Regular expression that marks the end of output, instead of the
    /// per-session random token.
    #[serde(deserialize_with = "deserialize_non_empty_string")]
    pub end_pattern: Option<String>,
    pub process: ProcessConfig,
}

/// How to start and talk to the interpreter process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Template written to the interpreter after each dispatched script,
    /// with `{mark}` replaced by the session's end-of-data token.
    #[serde(deserialize_with = "deserialize_non_empty_string")]
    pub marker_epilogue: Option<String>,
}

impl CaptureConfig {
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("ROWBOAT__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::invalid(e.to_string()))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The cell separator as a single byte. Multi-byte separators are not
    /// supported by the tokenizer.
    pub fn separator_byte(&self) -> CommonResult<u8> {
        if self.cell_separator.is_ascii() {
            Ok(self.cell_separator as u8)
        } else {
            Err(CommonError::invalid(format!(
                "cell separator must be an ASCII character: {:?}",
                self.cell_separator
            )))
        }
    }
}

// Keep in sync with `default.toml`.
impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cell_separator: ',',
            skip_first_line: false,
            multi_table: true,
            max_rows: 0,
            encoding: "utf-8".to_string(),
            quiet_period_ms: 5000,
            poll_interval_ms: 500,
            queue_capacity: 256,
            end_pattern: None,
            process: ProcessConfig::default(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
            marker_epilogue: None,
        }
    }
}

pub fn deserialize_non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}
