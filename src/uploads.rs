use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const UPLOADS_PREFIX: &str = "uploads";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    NoFile,
    #[error("Invalid file name: {0}")]
    InvalidName(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image attachments for completed blocks, kept in a single flat directory.
/// Paths handed out are relative: `uploads/<millis>-<safe name>`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let safe = safe_file_name(file_name);
        if safe.trim_matches('.').is_empty() {
            return Err(UploadError::InvalidName(file_name.to_string()));
        }

        fs::create_dir_all(&self.dir)?;

        let mut stamp = Utc::now().timestamp_millis();
        let mut unique = format!("{}-{}", stamp, safe);
        while self.dir.join(&unique).exists() {
            stamp += 1;
            unique = format!("{}-{}", stamp, safe);
        }

        fs::write(self.dir.join(&unique), bytes)?;
        info!("Stored upload {} ({} bytes)", unique, bytes.len());
        Ok(format!("{}/{}", UPLOADS_PREFIX, unique))
    }

    pub fn save_from_path(&self, source: &Path) -> Result<String, UploadError> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidName(source.display().to_string()))?;
        let bytes = fs::read(source)?;
        self.save(name, &bytes)
    }

    /// Only the basename of `path` is honored, so nothing outside the upload
    /// directory can be touched. A missing file counts as deleted.
    pub fn delete(&self, path: &str) -> Result<(), UploadError> {
        let name = Path::new(path)
            .file_name()
            .ok_or_else(|| UploadError::InvalidName(path.to_string()))?;
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every file in the upload directory. Individual failures are
    /// logged and skipped; returns how many files were removed.
    pub fn delete_all(&self) -> Result<usize, UploadError> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => error!("Failed to delete {}: {}", path.display(), e),
            }
        }
        info!("Deleted {} uploaded files", removed);
        Ok(removed)
    }

    /// Absolute location of a path previously returned by [`UploadStore::save`].
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        Path::new(path).file_name().map(|name| self.dir.join(name))
    }
}

pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}
