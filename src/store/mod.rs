//! Persistent JSON document store.
//!
//! Small named JSON documents under the moltbot home directory: the memory
//! map, the custom-tool manifest, and the scheduled task list all go through
//! these helpers. Writes go to a `.tmp` sibling first and are renamed into
//! place, so a crash mid-write never leaves a truncated document behind.
//! Single-process use only — there is no cross-process locking.

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load a JSON document, returning `T::default()` when the file is absent.
///
/// A file that exists but fails to parse is an error — silently resetting
/// state would lose user data.
pub fn load_json<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value).context("serialize JSON document")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_default() {
        let tmp = TempDir::new().unwrap();
        let map: BTreeMap<String, String> = load_json(&tmp.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn round_trip_and_no_tmp_residue() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/doc.json");
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), "v".to_string());
        save_json(&path, &map).unwrap();

        let loaded: BTreeMap<String, String> = load_json(&path).unwrap();
        assert_eq!(loaded, map);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let res: anyhow::Result<BTreeMap<String, String>> = load_json(&path);
        assert!(res.is_err());
    }
}
