//! Persistent agent api key.
//!
//! An agent without a configured key generates one on first start and keeps
//! it in a file with 0o600 permissions, so restarts re-register under the
//! same agent id.

use anyhow::{Context, Result};
use std::path::Path;
use uuid::Uuid;

/// Read the key stored at `path`, generating and saving a new one when the
/// file is missing or empty. Returns the key and whether it was just created.
pub fn load_or_create_api_key(path: &Path) -> Result<(String, bool)> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let key = contents.trim();
        if !key.is_empty() {
            return Ok((key.to_string(), false));
        }
    }

    let key = Uuid::new_v4().simple().to_string();
    save(path, &key)?;
    Ok((key, true))
}

fn save(path: &Path, key: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        f.write_all(key.as_bytes())?;
        f.write_all(b"\n")?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, format!("{key}\n"))
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("meetrelay-key-{}", Uuid::new_v4().simple()))
    }

    #[test]
    fn test_key_is_reused_across_restarts() {
        let dir = scratch_dir();
        let path = dir.join("agent.key");

        let (first, created) = load_or_create_api_key(&path).unwrap();
        assert!(created);
        assert_eq!(first.len(), 32);

        let (second, created) = load_or_create_api_key(&path).unwrap();
        assert!(!created);
        assert_eq!(first, second);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_empty_file_gets_a_fresh_key() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("agent.key");
        std::fs::write(&path, "  \n").unwrap();

        let (key, created) = load_or_create_api_key(&path).unwrap();
        assert!(created);
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), key);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = scratch_dir();
        let path = dir.join("agent.key");
        load_or_create_api_key(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
