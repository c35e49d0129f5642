//! Playbook catalog persistence (spec §6): an array-of-objects JSON file,
//! fully rewritten atomically on update (write-to-temp, rename) so a reader
//! never observes a half-written catalog.

use aios_types::Playbook;
use std::fs;
use std::io;
use std::path::Path;

/// Loads the catalog from `path`. A missing file is an empty catalog, not an
/// error - a fresh `$AIOS_HOME` has nothing loaded yet.
pub fn load(path: &Path) -> io::Result<Vec<Playbook>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Rewrites the catalog at `path`: serialize to a sibling temp file, fsync
/// it, then rename over the target. The rename is atomic on the same
/// filesystem, so a crash mid-write leaves the previous catalog intact
/// rather than a truncated one.
pub fn save(path: &Path, playbooks: &[Playbook]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(playbooks).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut file = fs::File::create(&tmp_path)?;
    use io::Write;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::playbook::ActionTemplate;
    use aios_types::{Risk, Trigger};
    use serde_json::json;
    use tempfile::tempdir;

    fn sample(id: &str) -> Playbook {
        Playbook {
            id: id.to_string(),
            name: "sample".to_string(),
            enabled: true,
            trigger: Trigger { event_pattern: "resource.*".to_string(), ..Default::default() },
            actions: vec![ActionTemplate { action_type: "shell".to_string(), target: "host".to_string(), params: json!({}) }],
            cooldown_sec: 60,
            require_confirm: false,
            risk: Risk::Low,
            verify: None,
        }
    }

    #[test]
    fn missing_file_loads_as_empty_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playbooks.json");
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playbooks.json");
        let playbooks = vec![sample("pb-1"), sample("pb-2")];

        save(&path, &playbooks).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "pb-1");
        assert!(!path.with_extension("json.tmp").exists(), "temp file must not survive a successful rename");
    }

    #[test]
    fn save_overwrites_previous_contents_entirely() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playbooks.json");

        save(&path, &[sample("pb-1"), sample("pb-2")]).unwrap();
        save(&path, &[sample("pb-3")]).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "pb-3");
    }
}
