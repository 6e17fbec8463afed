use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Decode bytes as UTF-8, replacing invalid sequences with the replacement character.
///
/// Valid input is returned without copying.
#[must_use]
pub fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// The file will either have the old contents or the new contents, never a
/// partial write. Missing parent directories are created.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    // Same directory so the rename never crosses filesystems
    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists. Try copy + remove as fallback.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Replace `dest` with the directory at `staging`.
///
/// `dest` is removed first (if present), then `staging` is renamed into its
/// place. Both must live on the same filesystem.
///
/// # Errors
/// Returns an error if removal or rename fails.
pub fn replace_dir(staging: &Path, dest: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staging, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_decode_lossy() {
        assert_eq!(decode_lossy(b"hello world".to_vec()), "hello world");

        let content = decode_lossy(vec![0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x80, 0x81]);
        assert!(content.starts_with("Hello"));
        assert!(content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("map.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_replace_dir_swaps_contents() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");
        let staging = dir.path().join("out.staging");

        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old.js"), "old").unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("new.js"), "new").unwrap();

        replace_dir(&staging, &dest).unwrap();

        assert!(!staging.exists());
        assert!(!dest.join("old.js").exists());
        assert_eq!(fs::read_to_string(dest.join("new.js")).unwrap(), "new");
    }

    #[test]
    fn test_replace_dir_missing_dest() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("fresh");
        let staging = dir.path().join("fresh.staging");
        fs::create_dir_all(&staging).unwrap();

        replace_dir(&staging, &dest).unwrap();
        assert!(dest.is_dir());
    }
}
