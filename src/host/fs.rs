//! Filesystem helpers shared by the renderer, the installer and the config
//! writer.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Re-anchors an absolute host path under `root`.
///
/// With `root` set to `/` this returns `path` unchanged.
#[must_use]
pub fn rooted(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let relative: PathBuf = path
        .as_ref()
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    root.join(relative)
}

/// Writes `content` to `path` so that either the whole new file lands or the
/// previous file is left untouched.
///
/// The data goes to a sibling temp file which is synced, given `mode`
/// explicitly and renamed over the destination. Parent directories are
/// created as needed.
///
/// # Errors
///
/// Returns any IO error; the temp file is removed on failure.
pub async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = write_then_rename(&temp_path, path, content, mode).await;
    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

/// Creates a new file that never exists with wider permissions than `mode`.
async fn create_with_mode(path: &Path, mode: u32) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .await
}

async fn write_then_rename(temp_path: &Path, path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let mut file = create_with_mode(temp_path, mode).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    // The umask may have narrowed the creation mode.
    fs::set_permissions(temp_path, std::fs::Permissions::from_mode(mode)).await?;
    fs::rename(temp_path, path).await?;
    debug!(path = %path.display(), mode = format!("{mode:o}"), "wrote file");
    Ok(())
}

/// Sets the permission bits of an existing path.
///
/// # Errors
///
/// Returns any IO error.
pub async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

/// Returns the permission bits of a path, if it exists.
pub async fn mode_of(path: &Path) -> Option<u32> {
    fs::metadata(path)
        .await
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

/// Replaces whatever is at `link` with a symlink pointing to `target`.
///
/// # Errors
///
/// Returns any IO error.
pub async fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if fs::symlink_metadata(link).await.is_ok() {
        fs::remove_file(link).await?;
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::symlink(target, link).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rooted_paths() {
        assert_eq!(
            rooted(Path::new("/"), "/etc/postfix/main.cf"),
            PathBuf::from("/etc/postfix/main.cf")
        );
        assert_eq!(
            rooted(Path::new("/tmp/host"), "/etc/postfix/main.cf"),
            PathBuf::from("/tmp/host/etc/postfix/main.cf")
        );
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_sets_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/secret.conf");

        write_atomic(&path, b"first", 0o644).await.unwrap();
        write_atomic(&path, b"second", 0o600).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(mode_of(&path).await, Some(0o600));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_temp_file_is_private_before_content_lands() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".key.pem.tmp");

        let file = create_with_mode(&path, 0o600).await.unwrap();
        let mode = mode_of(&path).await.unwrap();
        drop(file);

        assert_eq!(mode & 0o077, 0);
        assert!(create_with_mode(&path, 0o600).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_symlink() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, "x").unwrap();
        let link = dir.path().join("links/link");

        replace_symlink(&target, &link).await.unwrap();
        replace_symlink(&target, &link).await.unwrap();

        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }
}
