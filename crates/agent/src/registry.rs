//! Capability registry
//!
//! Maps capability names to handlers. Invocation never fails: unknown names,
//! bad arguments and handler errors all come back as text the model can read.

use async_trait::async_trait;
use nodewarden_provider::Tool;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

use crate::CapabilityError;

/// Whether invoking a capability changes system state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Read,
    Action,
}

/// A tool the model can call
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    /// Group tag used when describing the catalog
    fn group(&self) -> &str {
        "general"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Read
    }

    async fn execute(&self, args: Value) -> Result<String, CapabilityError>;
}

pub fn to_provider_tool(cap: &dyn Capability) -> Tool {
    Tool::new(cap.name(), cap.description(), cap.parameters())
}

/// Deserialize capability arguments into a typed struct
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(args).map_err(|e| CapabilityError::InvalidArguments(e.to_string()))
}

/// Empty-object parameter schema
pub fn no_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

type SharedCapability = Arc<dyn Capability>;

/// Name -> capability map shared by the interactive agent and the watchers
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, SharedCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SharedCapability>> {
        self.capabilities.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a capability; an existing entry with the same name is replaced
    pub fn register<C: Capability + 'static>(&self, cap: C) {
        self.register_shared(Arc::new(cap));
    }

    pub fn register_shared(&self, cap: SharedCapability) {
        let name = cap.name().to_string();
        let mut caps = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        if caps.contains_key(&name) {
            warn!("Capability '{}' already registered, overwriting", name);
        }
        debug!("Registered capability: {} (group: {})", name, cap.group());
        caps.insert(name, cap);
    }

    pub fn get(&self, name: &str) -> Option<SharedCapability> {
        self.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<CapabilityKind> {
        self.read().get(name).map(|c| c.kind())
    }

    /// Sorted capability names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Full catalog, sorted by name
    pub fn catalog(&self) -> Vec<Tool> {
        let caps = self.read();
        let mut tools: Vec<Tool> = caps.values().map(|c| to_provider_tool(c.as_ref())).collect();
        tools.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        tools
    }

    /// Catalog restricted to `names`, in the requested order; unknown names are skipped
    pub fn catalog_subset<S: AsRef<str>>(&self, names: &[S]) -> Vec<Tool> {
        let caps = self.read();
        names
            .iter()
            .filter_map(|n| caps.get(n.as_ref()))
            .map(|c| to_provider_tool(c.as_ref()))
            .collect()
    }

    /// Validate arguments and run the named capability
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        let Some(cap) = self.get(name) else {
            return format!("Error: Unknown capability '{name}'");
        };

        let args = match args {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        if let Err(e) = check_required(&cap.parameters(), &args) {
            return format!("Error calling {name}: {e}");
        }

        debug!("Invoking capability {}", name);
        match cap.execute(args).await {
            Ok(result) => result,
            Err(e @ CapabilityError::InvalidArguments(_)) => format!("Error calling {name}: {e}"),
            Err(e) => {
                error!("Capability {} failed: {}", name, e);
                format!("Error: {name} failed - {e}")
            }
        }
    }

    /// Markdown listing grouped by group tag, for the system prompt
    pub fn describe_all(&self) -> String {
        let caps = self.read();
        let mut groups: BTreeMap<String, Vec<&SharedCapability>> = BTreeMap::new();
        for cap in caps.values() {
            groups.entry(cap.group().to_string()).or_default().push(cap);
        }

        let mut lines = Vec::new();
        for (group, mut members) in groups {
            members.sort_by(|a, b| a.name().cmp(b.name()));
            lines.push(format!("\n### {group}"));
            for cap in members {
                let params = cap.parameters();
                let names: Vec<&str> = params["properties"]
                    .as_object()
                    .map(|p| p.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                lines.push(format!(
                    "- **{}**({}): {}",
                    cap.name(),
                    names.join(", "),
                    cap.description()
                ));
            }
        }
        lines.join("\n")
    }
}

fn check_required(schema: &Value, args: &Value) -> Result<(), CapabilityError> {
    let Some(obj) = args.as_object() else {
        return Err(CapabilityError::InvalidArguments(
            "arguments must be a JSON object".to_string(),
        ));
    };
    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(CapabilityError::InvalidArguments(format!(
                    "missing required argument '{field}'"
                )));
            }
        }
    }
    Ok(())
}
