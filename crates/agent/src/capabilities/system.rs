//! System diagnostics: health, world state, machine info

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::registry::{no_parameters, Capability};
use crate::world::WorldModel;
use crate::CapabilityError;

const GROUP: &str = "system";

pub struct SystemHealthCapability {
    world: Arc<WorldModel>,
}

impl SystemHealthCapability {
    pub fn new(world: Arc<WorldModel>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl Capability for SystemHealthCapability {
    fn name(&self) -> &str {
        "system_health"
    }
    fn description(&self) -> &str {
        "Get overall system health: daemon status, node health, resource overview."
    }
    fn parameters(&self) -> Value {
        no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        self.world.refresh().await;
        let mut lines = vec!["## System Health".to_string(), self.world.to_text()];
        let streams = self.world.bridge().buffered_topics().len();
        if streams > 0 {
            lines.push(format!("\nActive data streams: {streams}"));
        }
        Ok(lines.join("\n"))
    }
}

pub struct WorldStateCapability {
    world: Arc<WorldModel>,
}

impl WorldStateCapability {
    pub fn new(world: Arc<WorldModel>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl Capability for WorldStateCapability {
    fn name(&self) -> &str {
        "get_world_state"
    }
    fn description(&self) -> &str {
        "Get comprehensive view of current system: nodes, topics, watchers, captures."
    }
    fn parameters(&self) -> Value {
        no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        self.world.refresh().await;
        Ok(self.world.to_text())
    }
}

/// Host, CPU, memory, disk and GPU summary
pub struct MachineInfoCapability {
    timeout_secs: u64,
}

impl Default for MachineInfoCapability {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl MachineInfoCapability {
    /// Run a diagnostic command; `None` on failure, timeout or non-zero exit
    async fn command_output(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::null());
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", program, e);
                None
            }
            Err(_) => {
                debug!("Probe {} timed out", program);
                None
            }
        }
    }

    async fn disk_line(&self) -> Option<String> {
        let out = self.command_output("df", &["-Pk", "/"]).await?;
        parse_df(&out)
    }

    async fn gpu_lines(&self) -> Vec<String> {
        let Some(out) = self
            .command_output(
                "nvidia-smi",
                &[
                    "--query-gpu=name,memory.total,memory.used,temperature.gpu",
                    "--format=csv,noheader,nounits",
                ],
            )
            .await
        else {
            return Vec::new();
        };
        out.lines().filter_map(parse_gpu_line).collect()
    }
}

fn read_file(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn hostname() -> String {
    read_file("/proc/sys/kernel/hostname")
        .or_else(|| read_file("/etc/hostname"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

fn mem_total_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024.0 / 1024.0)
}

/// `df -Pk` second line: fs, 1k-blocks, used, available, ...
fn parse_df(out: &str) -> Option<String> {
    let fields: Vec<&str> = out.lines().nth(1)?.split_whitespace().collect();
    let total: f64 = fields.get(1)?.parse().ok()?;
    let used: f64 = fields.get(2)?.parse().ok()?;
    let free: f64 = fields.get(3)?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    let gb = |kb: f64| kb / 1024.0 / 1024.0;
    Some(format!(
        "Disk: {:.1}/{:.1} GB ({:.1}% used, {:.1} GB free)",
        gb(used),
        gb(total),
        used / total * 100.0,
        gb(free)
    ))
}

fn parse_gpu_line(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    Some(format!(
        "GPU: {} ({}/{} MB, {}°C)",
        parts[0], parts[2], parts[1], parts[3]
    ))
}

#[async_trait]
impl Capability for MachineInfoCapability {
    fn name(&self) -> &str {
        "get_machine_info"
    }
    fn description(&self) -> &str {
        "Get machine info: hostname, OS, CPU, memory, disk, GPU."
    }
    fn parameters(&self) -> Value {
        no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        let release = read_file("/proc/sys/kernel/osrelease").unwrap_or_default();
        let mut lines = vec![
            "## Machine Information".to_string(),
            format!("Hostname: {}", hostname()),
            format!("OS: {} {}", std::env::consts::OS, release.trim()),
            format!("Architecture: {}", std::env::consts::ARCH),
        ];

        if let Ok(cores) = std::thread::available_parallelism() {
            lines.push(format!("CPU cores: {cores}"));
        }
        if let Some(model) = read_file("/proc/cpuinfo").as_deref().and_then(cpu_model) {
            lines.push(format!("CPU: {model}"));
        }
        if let Some(gb) = read_file("/proc/meminfo").as_deref().and_then(mem_total_gb) {
            lines.push(format!("Memory: {gb:.1} GB"));
        }
        if let Some(disk) = self.disk_line().await {
            lines.push(disk);
        }
        if let Some(model) = read_file("/proc/device-tree/model") {
            lines.push(format!("Device: {}", model.trim().trim_end_matches('\0')));
        }
        lines.extend(self.gpu_lines().await);

        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_model() {
        let info = "processor\t: 0\nmodel name\t: ARMv8 Processor rev 1 (v8l)\n";
        assert_eq!(cpu_model(info).as_deref(), Some("ARMv8 Processor rev 1 (v8l)"));
        assert!(cpu_model("processor : 0").is_none());
    }

    #[test]
    fn test_mem_total() {
        let info = "MemTotal:       16777216 kB\nMemFree: 1 kB\n";
        assert_eq!(mem_total_gb(info), Some(16.0));
    }

    #[test]
    fn test_parse_df() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/root 1048576 524288 524288 50% /\n";
        assert_eq!(
            parse_df(out).as_deref(),
            Some("Disk: 0.5/1.0 GB (50.0% used, 0.5 GB free)")
        );
    }

    #[test]
    fn test_parse_gpu_line() {
        assert_eq!(
            parse_gpu_line("Orin, 30536, 1024, 45").as_deref(),
            Some("GPU: Orin (1024/30536 MB, 45°C)")
        );
        assert!(parse_gpu_line("garbage").is_none());
    }
}
