use std::io::ErrorKind;
use std::path::Path;

/// Removes a file, treating "already gone" as success.
pub(crate) async fn remove_file_ignore_not_exists(path: impl AsRef<Path>) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
