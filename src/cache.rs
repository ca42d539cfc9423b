use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

/// One-shot snapshot of the filenames in a save directory, taken before a
/// batch starts. Immutable afterwards, so lookups need no locking; files
/// appearing after the snapshot are not seen.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    files: HashSet<String>,
}

/// Extensions the download engine may produce for an episode.
pub(crate) const OUTPUT_EXTENSIONS: &[&str] = &[".mp4", ".ts"];

impl DirectoryCache {
    /// Lists the top-level, non-directory entries of `directory`. A missing
    /// directory yields an empty cache instead of an error.
    pub async fn snapshot(directory: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let mut read_dir = match tokio::fs::read_dir(directory).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };

        let mut files = HashSet::new();

        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await.map(|t| !t.is_dir()).unwrap_or(false) {
                files.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(DirectoryCache { files })
    }

    /// Whether an episode with this name (with or without one of the known
    /// output extensions) was present at snapshot time.
    pub fn exists(&self, name: &str) -> bool {
        if self.files.contains(name) {
            return true;
        }

        OUTPUT_EXTENSIONS
            .iter()
            .any(|extension| self.files.contains(&format!("{name}{extension}")))
    }

    /// Whether any snapshotted file starts with `prefix`, not counting
    /// files where the prefix is continued by another digit: "S01E1" must
    /// not match "S01E10 - Title.mp4".
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.files.iter().any(|file| {
            file.strip_prefix(prefix)
                .is_some_and(|rest| !rest.as_bytes().first().is_some_and(u8::is_ascii_digit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DirectoryCache;

    fn cache_of(names: &[&str]) -> DirectoryCache {
        DirectoryCache {
            files: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    #[test]
    fn test_exists_with_known_extensions() {
        let cache = cache_of(&["Show - S01E01.mp4", "Show - S01E02.ts", "Show - S01E03"]);

        assert!(cache.exists("Show - S01E01"));
        assert!(cache.exists("Show - S01E02"));
        assert!(cache.exists("Show - S01E03"));
        assert!(cache.exists("Show - S01E01.mp4"));
        assert!(!cache.exists("Show - S01E04"));
        assert!(!cache.exists("Show - S01E0"));
    }

    #[test]
    fn test_has_prefix_rejects_digit_continuation() {
        let cache = cache_of(&["S01E10 - Title.mp4"]);
        assert!(!cache.has_prefix("S01E1"));
        assert!(cache.has_prefix("S01E10"));

        let cache = cache_of(&["S01E1 - Title.mp4"]);
        assert!(cache.has_prefix("S01E1"));

        let cache = cache_of(&["S01E1.mp4"]);
        assert!(cache.has_prefix("S01E1"));
        assert!(!cache.has_prefix("S01E2"));
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_directory_is_empty() {
        let cache = DirectoryCache::snapshot("/this/path/does/not/exist/vdl-test")
            .await
            .unwrap();
        assert!(!cache.exists("anything"));
        assert!(!cache.has_prefix(""));
    }
}
