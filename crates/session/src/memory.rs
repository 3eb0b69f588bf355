//! Memory notes in `MEMORY.md`
//!
//! Notes are `- text` bullets grouped under `## Category` headings. Matching
//! for recall and forget is by shared lowercase words.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

use crate::Result;

const HEADER: &str = "# Agent Memory";

/// Persistent categorized notes
#[derive(Debug)]
pub struct MemoryNotes {
    path: PathBuf,
    write_lock: Mutex<()>,
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn title_case(category: &str) -> String {
    category
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl MemoryNotes {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_raw(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(format!("{HEADER}\n\n"));
        }
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    async fn write_raw(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Whole file, or empty when nothing has been stored
    pub async fn get_all(&self) -> Result<String> {
        let content = self.read_raw().await?;
        let trimmed = content.trim();
        if trimmed == HEADER {
            return Ok(String::new());
        }
        Ok(trimmed.to_string())
    }

    /// Store a note under `category` (created if missing)
    pub async fn remember(&self, content: &str, category: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_raw().await?;
        let heading = format!("## {}", title_case(category));

        let mut lines: Vec<String> = current.split('\n').map(String::from).collect();
        let updated = match lines.iter().position(|l| l.trim() == heading) {
            Some(start) => {
                let end = lines
                    .iter()
                    .skip(start + 1)
                    .position(|l| l.starts_with("## "))
                    .map(|offset| start + 1 + offset)
                    .unwrap_or(lines.len());
                // keep trailing blank lines after the new bullet
                let mut insert_at = end;
                while insert_at > start + 1 && lines[insert_at - 1].trim().is_empty() {
                    insert_at -= 1;
                }
                lines.insert(insert_at, format!("- {content}"));
                lines.join("\n")
            }
            None => format!("{}\n\n{}\n- {}\n", current.trim_end(), heading, content),
        };

        self.write_raw(&updated).await?;
        info!("Memory stored: [{}] {}", category, content);
        Ok(format!("Remembered under '{category}': {content}"))
    }

    /// Notes sharing at least one word with `query`
    pub async fn recall(&self, query: &str) -> Result<String> {
        let all = self.get_all().await?;
        if all.is_empty() {
            return Ok("No memories stored yet.".to_string());
        }

        let query_words = words(query);
        let mut section = "general".to_string();
        let mut matches = Vec::new();
        for line in all.lines() {
            if let Some(name) = line.strip_prefix("## ") {
                section = name.trim().to_string();
            } else if let Some(entry) = line.trim().strip_prefix("- ") {
                if !words(entry).is_disjoint(&query_words) {
                    matches.push(format!("- [{section}] {entry}"));
                }
            }
        }

        if matches.is_empty() {
            return Ok(format!("No specific matches for '{query}'. Full memory:\n{all}"));
        }
        Ok(format!("Matching memories:\n{}", matches.join("\n")))
    }

    /// Remove notes sharing more than half of the description's words
    pub async fn forget(&self, description: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        if !self.path.exists() {
            return Ok("No memories to forget.".to_string());
        }

        let current = self.read_raw().await?;
        let query_words = words(description);
        let mut removed = Vec::new();
        let mut kept = Vec::new();

        for line in current.split('\n') {
            if let Some(entry) = line.trim().strip_prefix("- ") {
                let overlap = words(entry).intersection(&query_words).count();
                if overlap * 2 > query_words.len() {
                    removed.push(entry.to_string());
                    continue;
                }
            }
            kept.push(line);
        }

        if removed.is_empty() {
            return Ok(format!("No memories matching '{description}' found."));
        }

        self.write_raw(&kept.join("\n")).await?;
        info!("Forgot {} memory entries", removed.len());
        let listing: Vec<String> = removed.iter().map(|r| format!("- {r}")).collect();
        Ok(format!("Forgot {} entries:\n{}", removed.len(), listing.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("general"), "General");
        assert_eq!(title_case("node issues"), "Node Issues");
        assert_eq!(title_case("PATTERNS"), "Patterns");
    }

    #[test]
    fn test_words_lowercase() {
        let w = words("Camera FRONT camera");
        assert_eq!(w.len(), 2);
        assert!(w.contains("camera"));
        assert!(w.contains("front"));
    }
}
