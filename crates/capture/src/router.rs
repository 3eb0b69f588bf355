//! Capture router
//!
//! Owns the capture set, wires each capture to a bridge callback and keeps
//! `captures.json` in sync. Bridge callbacks cannot be detached, so a
//! stopped capture stays in memory as inactive and its callback turns into
//! a no-op.
//!
//! Callbacks run on the bridge's ingestion task and only enqueue; a single
//! writer task per router does the file I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use nodewarden_agent::StatusSection;
use nodewarden_bridge::{CallbackError, SampleCallback, TopicBridge, TopicSample};

use crate::capture::{Capture, CaptureFormat};
use crate::path_guard::AllowedPaths;
use crate::writer::write_sample;
use crate::{CaptureError, Result};

/// Sample queued for the writer task
struct PendingSample {
    capture_id: String,
    sample: TopicSample,
}

pub struct CaptureRouter {
    bridge: Arc<TopicBridge>,
    store_path: PathBuf,
    allowed: AllowedPaths,
    captures: Mutex<Vec<Capture>>,
    queue: mpsc::UnboundedSender<PendingSample>,
}

impl CaptureRouter {
    /// Build the router and load persisted captures (not yet subscribed)
    pub async fn open<S: AsRef<str>>(
        bridge: Arc<TopicBridge>,
        store_path: impl AsRef<Path>,
        allowed_data_paths: &[S],
    ) -> Arc<Self> {
        let store_path = store_path.as_ref().to_path_buf();
        let captures = match load(&store_path).await {
            Ok(captures) => captures,
            Err(e) => {
                error!("Failed to load captures from {:?}: {}", store_path, e);
                Vec::new()
            }
        };
        for capture in &captures {
            info!("Loaded capture: {} ({})", capture.id, capture.topic);
        }

        let (queue, pending) = mpsc::unbounded_channel();
        let router = Arc::new(Self {
            bridge,
            store_path,
            allowed: AllowedPaths::new(allowed_data_paths),
            captures: Mutex::new(captures),
            queue,
        });
        tokio::spawn(run_writer(Arc::downgrade(&router), pending));
        router
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Capture>> {
        self.captures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate, persist and subscribe a new capture
    pub async fn start_capture(
        self: &Arc<Self>,
        topic: &str,
        output_path: &str,
        format: CaptureFormat,
        max_files: usize,
    ) -> Result<String> {
        let resolved = self.allowed.validate(output_path)?;
        tokio::fs::create_dir_all(&resolved).await?;

        let capture = Capture::new(topic, resolved, format, max_files);
        let id = capture.id.clone();
        let message = format!(
            "Capture started.\n  ID: {}\n  Topic: {}\n  Output: {}\n  Format: {}",
            capture.id,
            capture.topic,
            capture.output_path.display(),
            capture.format
        );
        info!(
            "◆ Started capture {}: {} -> {:?} ({})",
            capture.id, capture.topic, capture.output_path, capture.format
        );

        self.lock().push(capture);
        self.bridge.subscribe(topic, Some(self.callback(&id))).await.map_err(|e| {
            self.lock().retain(|c| c.id != id);
            e
        })?;
        self.persist().await;
        Ok(message)
    }

    /// Deactivate a capture and drop it from the persisted set
    pub async fn stop_capture(&self, id: &str) -> Result<String> {
        let message = {
            let mut captures = self.lock();
            let capture = captures
                .iter_mut()
                .find(|c| c.id == id && c.active)
                .ok_or_else(|| CaptureError::NotFound(id.to_string()))?;
            capture.active = false;
            format!(
                "Capture '{}' stopped.\n  Duration: {:.0}s\n  Files written: {}\n  Bytes written: {}\n  Samples: {}",
                capture.id,
                capture.duration_secs(),
                capture.files_written,
                capture.bytes_written,
                capture.samples_received
            )
        };
        self.persist().await;
        info!("Stopped capture {}", id);
        Ok(message)
    }

    /// Re-subscribe every persisted capture
    pub async fn resume(self: &Arc<Self>) -> usize {
        let pending: Vec<(String, String)> = self
            .lock()
            .iter()
            .filter(|c| c.active)
            .map(|c| (c.id.clone(), c.topic.clone()))
            .collect();

        let mut resumed = 0;
        for (id, topic) in pending {
            match self.bridge.subscribe(&topic, Some(self.callback(&id))).await {
                Ok(_) => {
                    info!("Resumed capture {}: {}", id, topic);
                    resumed += 1;
                }
                Err(e) => warn!("Cannot resume capture {} on {}: {}", id, topic, e),
            }
        }
        resumed
    }

    pub fn get(&self, id: &str) -> Option<Capture> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    /// Active captures in creation order
    pub fn active(&self) -> Vec<Capture> {
        self.lock().iter().filter(|c| c.active).cloned().collect()
    }

    pub fn describe_all(&self) -> String {
        let active = self.active();
        if active.is_empty() {
            return "No active captures.".to_string();
        }
        active
            .iter()
            .map(Capture::summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn callback(self: &Arc<Self>, id: &str) -> SampleCallback {
        let router: Weak<Self> = Arc::downgrade(self);
        let id = id.to_string();
        Arc::new(move |sample: &TopicSample| {
            let Some(router) = router.upgrade() else {
                return Ok(());
            };
            router
                .queue
                .send(PendingSample {
                    capture_id: id.clone(),
                    sample: sample.clone(),
                })
                .map_err(|_| CallbackError::new(format!("capture {id} writer has stopped")))
        })
    }

    /// Write one queued sample; counters are updated once the write lands
    async fn on_sample(&self, pending: PendingSample) -> Result<()> {
        let PendingSample { capture_id, sample } = pending;
        let mut working = {
            let captures = self.lock();
            let Some(capture) = captures.iter().find(|c| c.id == capture_id && c.active) else {
                return Ok(());
            };
            capture.clone()
        };
        working.samples_received += 1;
        debug!("Capture {} sample #{}", working.id, working.samples_received);

        let decoded = self.bridge.decode_sample(&sample).to_value();
        let written = write_sample(&mut working, &sample, decoded).await;

        if let Some(capture) = self.lock().iter_mut().find(|c| c.id == capture_id) {
            capture.samples_received = working.samples_received;
            capture.files_written = working.files_written;
            capture.bytes_written = working.bytes_written;
        }
        written
    }

    async fn persist(&self) {
        let active = self.active();
        if let Err(e) = save(&self.store_path, &active).await {
            warn!("Failed to save captures: {}", e);
        }
    }
}

async fn run_writer(router: Weak<CaptureRouter>, mut pending: mpsc::UnboundedReceiver<PendingSample>) {
    while let Some(next) = pending.recv().await {
        let Some(router) = router.upgrade() else {
            break;
        };
        let id = next.capture_id.clone();
        if let Err(e) = router.on_sample(next).await {
            error!("Capture {} write error: {}", id, e);
        }
    }
    debug!("Capture writer stopped");
}

async fn load(path: &Path) -> Result<Vec<Capture>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn save(path: &Path, captures: &[Capture]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(captures)?).await?;
    Ok(())
}

impl StatusSection for CaptureRouter {
    fn title(&self) -> &str {
        "Active Data Captures"
    }

    fn render(&self) -> Option<String> {
        if self.active().is_empty() {
            None
        } else {
            Some(self.describe_all())
        }
    }
}
