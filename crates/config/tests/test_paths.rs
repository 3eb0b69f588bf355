//! Tests for path utilities

use nodewarden_config::paths::{
    captures_path, conversations_dir, ensure_dir, memory_path, safe_filename, watchers_path,
};

use tempfile::TempDir;

/// Helper to create a temporary directory
fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_safe_filename_special_chars() {
    assert_eq!(safe_filename("file<name>"), "file_name_");
    assert_eq!(safe_filename("file:name"), "file_name");
    assert_eq!(safe_filename("file/name"), "file_name");
    assert_eq!(safe_filename("file\\name"), "file_name");
    assert_eq!(safe_filename("file*name"), "file_name");
}

#[test]
fn test_safe_filename_normal() {
    assert_eq!(safe_filename("conv-1234"), "conv-1234");
    assert_eq!(safe_filename("file.txt"), "file.txt");
    assert_eq!(safe_filename(""), "");
}

#[test]
fn test_agent_file_layout() {
    let base = std::path::Path::new("/var/lib/warden");
    assert_eq!(watchers_path(base), base.join("watchers.json"));
    assert_eq!(captures_path(base), base.join("captures.json"));
    assert_eq!(memory_path(base), base.join("MEMORY.md"));
    assert_eq!(conversations_dir(base), base.join("conversations"));
}

#[tokio::test]
async fn test_ensure_dir_creates_nested() {
    let dir = temp_dir();
    let nested = dir.path().join("a").join("b").join("c");

    ensure_dir(&nested).await.unwrap();
    assert!(nested.is_dir());

    // Idempotent
    ensure_dir(&nested).await.unwrap();
}
