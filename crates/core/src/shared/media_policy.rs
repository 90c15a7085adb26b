use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_CONTENT_LENGTH};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("invalid file type '{extension}'. Allowed: {allowed}")]
    DisallowedExtension { extension: String, allowed: String },
    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("cannot inspect {path}: {reason}")]
    Inaccessible { path: PathBuf, reason: String },
}

/// Host-supplied allowlist of acceptable input files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_content_length: u64,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

impl MediaPolicy {
    /// Checks extension (case-insensitive) and on-disk size.
    pub fn check(&self, path: &Path) -> Result<(), PolicyError> {
        self.check_extension(path)?;

        let size = std::fs::metadata(path)
            .map_err(|e| PolicyError::Inaccessible {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .len();
        if size > self.max_content_length {
            return Err(PolicyError::TooLarge {
                size,
                limit: self.max_content_length,
            });
        }
        Ok(())
    }

    pub fn check_extension(&self, path: &Path) -> Result<(), PolicyError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let allowed = self
            .allowed_extensions
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&extension));
        if extension.is_empty() || !allowed {
            return Err(PolicyError::DisallowedExtension {
                extension,
                allowed: self.allowed_extensions.join(", "),
            });
        }
        Ok(())
    }
}
