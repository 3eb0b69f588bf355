//! Common test utilities for the warden CLI tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated home directory holding `.nodewarden/`
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".nodewarden");
        Ok(Self { temp_dir, data_dir })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn agent_file(&self, name: &str) -> PathBuf {
        self.data_dir.join("agent").join(name)
    }

    /// Command with HOME pointed at the temp dir
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config with a key so the provider counts as configured
    pub fn create_config(&self) -> anyhow::Result<()> {
        let config = r#"{
  "provider": {
    "api_key": "test-api-key",
    "api_base": "http://127.0.0.1:9/v1",
    "model": "test-model"
  },
  "transport": { "scope": "lab", "machine_id": "bench-1" }
}"#;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.config_file(), config)?;
        Ok(())
    }
}
