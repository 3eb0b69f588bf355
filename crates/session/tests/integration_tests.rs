//! Integration tests for nodewarden-session
//!
//! Covers conversation logs (append, load, bounded history, role filtering)
//! and memory notes (remember, recall, forget).

use nodewarden_session::{ConversationStore, MemoryNotes};
use tempfile::TempDir;

// ============================================================================
// Conversation logs
// ============================================================================

#[tokio::test]
async fn test_only_user_and_assistant_turns_are_durable() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::new(dir.path().join("conversations"));

    assert!(store.append("abc", "user", "start the camera").await.unwrap());
    assert!(!store.append("abc", "tool", "started").await.unwrap());
    assert!(!store.append("abc", "system", "ctx").await.unwrap());
    assert!(store.append("abc", "assistant", "Camera started").await.unwrap());

    let turns = store.load("abc").await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, "user");
    assert_eq!(turns[1].content, "Camera started");
}

#[tokio::test]
async fn test_missing_conversation_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::new(dir.path());
    assert!(store.load("nope").await.unwrap().is_empty());
    assert!(store.history("nope", 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_is_bounded_to_recent_turns() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::new(dir.path());

    for i in 0..30 {
        let role = if i % 2 == 0 { "user" } else { "assistant" };
        store.append("long", role, &format!("turn {i}")).await.unwrap();
    }

    let history = store.history("long", 20).await.unwrap();
    assert_eq!(history.len(), 20);
    assert_eq!(history[0].text(), "turn 10");
    assert_eq!(history[0].role, "user");
    assert_eq!(history[19].text(), "turn 29");
    assert_eq!(history[19].role, "assistant");

    assert_eq!(store.load("long").await.unwrap().len(), 30);
}

#[tokio::test]
async fn test_corrupt_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::new(dir.path());
    store.append("c1", "user", "hello").await.unwrap();

    let path = dir.path().join("c1.jsonl");
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push_str("{not json\n\n");
    std::fs::write(&path, content).unwrap();
    store.append("c1", "assistant", "hi").await.unwrap();

    let turns = store.load("c1").await.unwrap();
    assert_eq!(turns.len(), 2);
}

#[tokio::test]
async fn test_list_conversations() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::new(dir.path());
    store.append("b", "user", "x").await.unwrap();
    store.append("a", "user", "y").await.unwrap();

    assert_eq!(store.list().await, vec!["a".to_string(), "b".to_string()]);
}

// ============================================================================
// Memory notes
// ============================================================================

#[tokio::test]
async fn test_empty_memory() {
    let dir = TempDir::new().unwrap();
    let memory = MemoryNotes::new(dir.path().join("MEMORY.md"));

    assert_eq!(memory.get_all().await.unwrap(), "");
    assert_eq!(memory.recall("camera").await.unwrap(), "No memories stored yet.");
    assert_eq!(memory.forget("camera").await.unwrap(), "No memories to forget.");
}

#[tokio::test]
async fn test_remember_groups_by_category() {
    let dir = TempDir::new().unwrap();
    let memory = MemoryNotes::new(dir.path().join("MEMORY.md"));

    let reply = memory
        .remember("camera node crashes above 80C", "issues")
        .await
        .unwrap();
    assert_eq!(reply, "Remembered under 'issues': camera node crashes above 80C");
    memory.remember("operator prefers short answers", "preferences").await.unwrap();
    memory.remember("lidar restarts fix drift", "issues").await.unwrap();

    let all = memory.get_all().await.unwrap();
    let issues = all.find("## Issues").unwrap();
    let prefs = all.find("## Preferences").unwrap();
    let lidar = all.find("- lidar restarts fix drift").unwrap();
    assert!(issues < lidar && lidar < prefs);
    assert_eq!(all.matches("## Issues").count(), 1);
}

#[tokio::test]
async fn test_recall_matches_words() {
    let dir = TempDir::new().unwrap();
    let memory = MemoryNotes::new(dir.path().join("MEMORY.md"));
    memory.remember("camera node crashes above 80C", "issues").await.unwrap();
    memory.remember("weather node is flaky", "general").await.unwrap();

    let found = memory.recall("Camera temperature").await.unwrap();
    assert!(found.starts_with("Matching memories:"));
    assert!(found.contains("[Issues] camera node crashes above 80C"));
    assert!(!found.contains("weather"));

    let fallback = memory.recall("unrelated").await.unwrap();
    assert!(fallback.starts_with("No specific matches for 'unrelated'"));
    assert!(fallback.contains("weather node is flaky"));
}

#[tokio::test]
async fn test_forget_requires_majority_overlap() {
    let dir = TempDir::new().unwrap();
    let memory = MemoryNotes::new(dir.path().join("MEMORY.md"));
    memory.remember("camera node crashes above 80C", "issues").await.unwrap();
    memory.remember("camera calibration done", "general").await.unwrap();

    let reply = memory.forget("camera crashes").await.unwrap();
    assert!(reply.starts_with("Forgot 1 entries:"));
    assert!(reply.contains("camera node crashes above 80C"));

    let all = memory.get_all().await.unwrap();
    assert!(!all.contains("crashes"));
    assert!(all.contains("camera calibration done"));

    let none = memory.forget("something else entirely").await.unwrap();
    assert_eq!(none, "No memories matching 'something else entirely' found.");
}
