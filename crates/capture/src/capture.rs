//! Capture records and output formats

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::CaptureError;

/// How samples are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// One JSON object per line in `data.jsonl`
    #[default]
    Json,
    /// One row per sample in `data.csv`
    Csv,
    /// One `NNNNNNNN.bin` file per sample
    #[serde(alias = "h264")]
    Raw,
}

impl CaptureFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureFormat::Json => "json",
            CaptureFormat::Csv => "csv",
            CaptureFormat::Raw => "raw",
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(CaptureFormat::Json),
            "csv" => Ok(CaptureFormat::Csv),
            // encoded video frames are stored as-is
            "raw" | "h264" => Ok(CaptureFormat::Raw),
            _ => Err(CaptureError::UnknownFormat(s.to_string())),
        }
    }
}

pub(crate) fn now_epoch_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn active() -> bool {
    true
}

/// One topic-to-file recording
///
/// Only the identifying fields are persisted; counters restart at zero when
/// a capture is resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub topic: String,
    pub output_path: PathBuf,
    #[serde(default)]
    pub format: CaptureFormat,
    /// 0 = unlimited
    #[serde(default)]
    pub max_files: usize,
    #[serde(default = "now_epoch_secs")]
    pub started_at: f64,
    #[serde(skip)]
    pub samples_received: u64,
    #[serde(skip)]
    pub files_written: u64,
    #[serde(skip)]
    pub bytes_written: u64,
    #[serde(skip, default = "active")]
    pub active: bool,
}

impl Capture {
    pub fn new(topic: impl Into<String>, output_path: PathBuf, format: CaptureFormat, max_files: usize) -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("cap-{}", &hex[..8]),
            topic: topic.into(),
            output_path,
            format,
            max_files,
            started_at: now_epoch_secs(),
            samples_received: 0,
            files_written: 0,
            bytes_written: 0,
            active: true,
        }
    }

    /// Seconds since the capture started
    pub fn duration_secs(&self) -> f64 {
        (now_epoch_secs() - self.started_at).max(0.0)
    }

    /// `- [id] topic -> path (format, N samples, Ds)`
    pub fn summary_line(&self) -> String {
        format!(
            "- [{}] {} -> {} ({}, {} samples, {:.0}s)",
            self.id,
            self.topic,
            self.output_path.display(),
            self.format,
            self.samples_received,
            self.duration_secs()
        )
    }
}
