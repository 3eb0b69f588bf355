//! Per-format sample writers

use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use nodewarden_bridge::TopicSample;

use crate::capture::{Capture, CaptureFormat};
use crate::Result;

const JSON_FILE: &str = "data.jsonl";
const CSV_FILE: &str = "data.csv";

/// Append one sample to the capture's output and update its counters
///
/// `capture.samples_received` must already count this sample.
pub(crate) async fn write_sample(capture: &mut Capture, sample: &TopicSample, decoded: Value) -> Result<()> {
    fs::create_dir_all(&capture.output_path).await?;
    match capture.format {
        CaptureFormat::Json => write_json(capture, sample, decoded).await?,
        CaptureFormat::Csv => write_csv(capture, sample, decoded).await?,
        CaptureFormat::Raw => write_raw(capture, sample).await?,
    }
    enforce_max_files(capture).await
}

fn epoch_secs(sample: &TopicSample) -> f64 {
    sample.received_at.timestamp_millis() as f64 / 1000.0
}

async fn write_json(capture: &mut Capture, sample: &TopicSample, decoded: Value) -> Result<()> {
    let record = json!({
        "timestamp": epoch_secs(sample),
        "key": sample.key,
        "data": decoded,
    });
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(capture.output_path.join(JSON_FILE))
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;

    capture.files_written = 1;
    capture.bytes_written += line.len() as u64;
    Ok(())
}

async fn write_csv(capture: &mut Capture, sample: &TopicSample, decoded: Value) -> Result<()> {
    let path = capture.output_path.join(CSV_FILE);
    let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
    let empty = file.metadata().await?.len() == 0;

    let mut text = String::new();
    let mut row = vec![epoch_secs(sample).to_string(), csv_field(&sample.key)];
    match &decoded {
        Value::Object(map) => {
            if empty {
                let mut header = vec!["timestamp".to_string(), "key".to_string()];
                header.extend(map.keys().map(|k| csv_field(k)));
                text.push_str(&header.join(","));
                text.push('\n');
            }
            row.extend(map.values().map(|v| csv_field(&cell(v))));
        }
        other => row.push(csv_field(&cell(other))),
    }
    text.push_str(&row.join(","));
    text.push('\n');
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;

    capture.files_written = 1;
    capture.bytes_written = fs::metadata(&path).await?.len();
    Ok(())
}

async fn write_raw(capture: &mut Capture, sample: &TopicSample) -> Result<()> {
    let path = capture
        .output_path
        .join(format!("{:08}.bin", capture.samples_received));
    fs::write(path, &sample.payload).await?;

    capture.files_written += 1;
    capture.bytes_written += sample.payload.len() as u64;
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quote a field when it contains a separator, quote or newline
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Delete the oldest files until at most `max_files` remain
async fn enforce_max_files(capture: &mut Capture) -> Result<()> {
    if capture.max_files == 0 {
        return Ok(());
    }
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    let mut entries = fs::read_dir(&capture.output_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        if let Ok(modified) = metadata.modified() {
            files.push((modified, entry.path()));
        }
    }
    if files.len() <= capture.max_files {
        return Ok(());
    }
    files.sort();
    let excess = files.len() - capture.max_files;
    for (_, path) in files.into_iter().take(excess) {
        fs::remove_file(&path).await?;
        capture.files_written = capture.files_written.saturating_sub(1);
    }
    Ok(())
}
