//! Categorized key/value memory, persisted as a single JSON document.
//!
//! Layout on disk (`memories.json`):
//! `{ category: { key: { content, created_at, updated_at } } }`.
//!
//! A fixed set of priority categories is projected into the system prompt on
//! every turn so the model always sees wallets, API endpoints, secrets
//! metadata, and user preferences without having to recall them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store;
use crate::utils::truncate_str;

/// Categories surfaced in the system prompt, in order, before all others.
pub const PRIORITY_CATEGORIES: [&str; 4] = ["wallet", "api", "secret", "preference"];

/// One remembered fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

type MemoryMap = BTreeMap<String, BTreeMap<String, MemoryEntry>>;

/// Handle to the on-disk memory document. Cheap to share behind an `Arc`.
pub struct MemoryStore {
    path: PathBuf,
    entries: Mutex<MemoryMap>,
}

impl MemoryStore {
    /// Open (or create) the memory document at `path`.
    pub fn open(path: PathBuf) -> anyhow::Result<MemoryStore> {
        let entries: MemoryMap = store::load_json(&path)?;
        Ok(MemoryStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &MemoryMap) -> anyhow::Result<()> {
        store::save_json(&self.path, entries)
    }

    /// Insert or overwrite one entry and persist immediately.
    pub fn remember(&self, category: &str, key: &str, content: &str) -> anyhow::Result<String> {
        let now = Utc::now().to_rfc3339();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = entries.entry(category.to_string()).or_default();
        let created_at = bucket
            .get(key)
            .map(|e| e.created_at.clone())
            .unwrap_or_else(|| now.clone());
        bucket.insert(
            key.to_string(),
            MemoryEntry {
                content: content.to_string(),
                created_at,
                updated_at: now,
            },
        );
        self.persist(&entries)?;
        tracing::debug!(category, key, "memory stored");
        Ok(format!("Remembered {category}/{key}."))
    }

    /// Case-insensitive substring search over keys and contents.
    pub fn recall(&self, query: Option<&str>, category: Option<&str>) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let needle = query.map(str::to_lowercase);
        let mut matches = Vec::new();

        for (cat, bucket) in entries.iter() {
            if let Some(filter) = category {
                if cat != filter {
                    continue;
                }
            }
            for (key, entry) in bucket {
                let hit = match &needle {
                    Some(n) => {
                        key.to_lowercase().contains(n) || entry.content.to_lowercase().contains(n)
                    }
                    None => true,
                };
                if hit {
                    matches.push(format!("[{cat}/{key}]\n{}", entry.content));
                }
            }
        }

        if matches.is_empty() {
            match query {
                Some(q) => format!("No memories matching '{q}'."),
                None => "No memories stored yet.".to_string(),
            }
        } else {
            matches.join("\n\n---\n\n")
        }
    }

    /// Remove one entry; an emptied category is pruned from the document.
    pub fn forget(&self, category: &str, key: &str) -> anyhow::Result<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = entries.get_mut(category) else {
            anyhow::bail!("no such memory category: '{category}'");
        };
        if bucket.remove(key).is_none() {
            anyhow::bail!("no memory '{key}' in category '{category}'");
        }
        if bucket.is_empty() {
            entries.remove(category);
        }
        self.persist(&entries)?;
        tracing::debug!(category, key, "memory removed");
        Ok(format!("Forgot {category}/{key}."))
    }

    /// Human-readable index of everything stored, grouped by category.
    pub fn list_memories(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return "No memories stored yet.".to_string();
        }
        let mut out = String::new();
        for (cat, bucket) in entries.iter() {
            out.push_str(&format!("## {cat} ({})\n", bucket.len()));
            for (key, entry) in bucket {
                out.push_str(&format!("- {key}: {}\n", truncate_str(&entry.content, 50)));
            }
        }
        out.trim_end().to_string()
    }

    /// Flat projection for the system prompt: priority categories first, in
    /// their fixed order, then the rest sorted by name.
    pub fn get_core_memories(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return String::new();
        }

        let mut ordered: Vec<&str> = PRIORITY_CATEGORIES
            .iter()
            .copied()
            .filter(|c| entries.contains_key(*c))
            .collect();
        for cat in entries.keys() {
            if !PRIORITY_CATEGORIES.contains(&cat.as_str()) {
                ordered.push(cat);
            }
        }

        let mut out = String::new();
        for cat in ordered {
            if let Some(bucket) = entries.get(cat) {
                for (key, entry) in bucket {
                    out.push_str(&format!("- [{cat}] {key}: {}\n", entry.content));
                }
            }
        }
        out.trim_end().to_string()
    }
}
