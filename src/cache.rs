//! Response cache directory.
//!
//! The directory belongs to the embedding application, which may keep its own
//! HTTP cache or other files there. The broker never writes to it: API
//! responses are always fetched fresh (`Cache-Control: no-cache`) and are not
//! stored. The broker only records the path, creates it when set, and empties
//! it on `clear_cache`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, instrument};

/// Errors from cache directory management.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Tracks the cache directory.
#[derive(Debug, Default)]
pub struct ResponseCache {
    directory: RwLock<Option<PathBuf>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self {
            directory: RwLock::new(directory),
        }
    }

    /// Current directory, if one was set.
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Points the cache at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created.
    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    pub fn set_directory(&self, path: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(path).map_err(|e| CacheError::io(path, e))?;
        *self.directory.write().unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());
        info!(path = %path.display(), "Cache directory set");
        Ok(())
    }

    /// Removes everything inside the cache directory. The directory itself stays.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if an entry cannot be removed.
    pub fn clear(&self) -> Result<(), CacheError> {
        let Some(dir) = self.directory() else {
            debug!("no cache directory set; nothing to clear");
            return Ok(());
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(&dir, e)),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
            if file_type.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            }
            .map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }

        info!(path = %dir.display(), removed, "Cache cleared");
        Ok(())
    }
}
