//! Capture capabilities

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use nodewarden_agent::{
    no_parameters, parse_args, Capability, CapabilityError, CapabilityKind, CapabilityRegistry,
};

use crate::capture::CaptureFormat;
use crate::router::CaptureRouter;
use crate::CaptureError;

const GROUP: &str = "data";

/// Register `save_stream`, `stop_capture` and `list_captures`
pub fn register_capture_capabilities(registry: &CapabilityRegistry, router: &Arc<CaptureRouter>) {
    registry.register(SaveStreamCapability {
        router: router.clone(),
    });
    registry.register(StopCaptureCapability {
        router: router.clone(),
    });
    registry.register(ListCapturesCapability {
        router: router.clone(),
    });
}

/// Rejections the model can act on come back as text
fn render(result: crate::Result<String>) -> Result<String, CapabilityError> {
    match result {
        Ok(text) => Ok(text),
        Err(e @ CaptureError::NotFound(_)) => Ok(e.to_string()),
        Err(
            e @ (CaptureError::PathNotAllowed { .. }
            | CaptureError::PathTraversal
            | CaptureError::UnknownFormat(_)),
        ) => Ok(format!("Error: {e}")),
        Err(e) => Err(CapabilityError::failed(e.to_string())),
    }
}

pub struct SaveStreamCapability {
    router: Arc<CaptureRouter>,
}

#[derive(Deserialize)]
struct SaveStreamArgs {
    topic: String,
    output_path: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    max_files: usize,
}

#[async_trait]
impl Capability for SaveStreamCapability {
    fn name(&self) -> &str {
        "save_stream"
    }
    fn description(&self) -> &str {
        "Start capturing data from a topic to files on disk."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "Topic suffix to capture (e.g., 'weather/current')." },
                "output_path": { "type": "string", "description": "Directory to save files to (must be in allowed paths)." },
                "format": { "type": "string", "enum": ["json", "csv", "raw"], "description": "Output format (default: json)." },
                "max_files": { "type": "integer", "description": "Max files to keep (0 = unlimited)." }
            },
            "required": ["topic", "output_path"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: SaveStreamArgs = parse_args(args)?;
        let format = match args.format.as_deref().unwrap_or("json").parse::<CaptureFormat>() {
            Ok(format) => format,
            Err(e) => return render(Err(e)),
        };
        render(
            self.router
                .start_capture(&args.topic, &args.output_path, format, args.max_files)
                .await,
        )
    }
}

pub struct StopCaptureCapability {
    router: Arc<CaptureRouter>,
}

#[derive(Deserialize)]
struct StopCaptureArgs {
    capture_id: String,
}

#[async_trait]
impl Capability for StopCaptureCapability {
    fn name(&self) -> &str {
        "stop_capture"
    }
    fn description(&self) -> &str {
        "Stop an active data capture."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "capture_id": { "type": "string", "description": "ID of the capture to stop." }
            },
            "required": ["capture_id"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: StopCaptureArgs = parse_args(args)?;
        render(self.router.stop_capture(&args.capture_id).await)
    }
}

pub struct ListCapturesCapability {
    router: Arc<CaptureRouter>,
}

#[async_trait]
impl Capability for ListCapturesCapability {
    fn name(&self) -> &str {
        "list_captures"
    }
    fn description(&self) -> &str {
        "List all active data captures with details."
    }
    fn parameters(&self) -> Value {
        no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        Ok(self.router.describe_all())
    }
}
