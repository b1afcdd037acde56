use std::io;

use tokio::fs;
use tracing::debug;

use super::SecurityGate;
use crate::error::ClientError;

#[derive(Clone)]
pub(crate) struct DirectoryResource {
    gate: SecurityGate,
}

impl DirectoryResource {
    pub(crate) fn new(gate: SecurityGate) -> Self {
        Self { gate }
    }

    /// Expands `pattern` as a glob. Matches come back in glob's
    /// alphabetical order. The walk runs on the blocking pool.
    pub(crate) async fn list(&self, pattern: &str) -> Result<Vec<String>, ClientError> {
        let pattern = self.gate.validate_path(pattern)?;
        tokio::task::spawn_blocking(move || expand_glob(&pattern.to_string_lossy()))
            .await
            .map_err(|error| ClientError::Io(io::Error::other(error)))?
    }

    pub(crate) async fn create(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let path = self.gate.validate_path(path)?;
        fs::create_dir_all(&path).await?;
        Ok(vec![path.to_string_lossy().into_owned()])
    }

    /// Denied and missing paths both report `false`.
    pub(crate) async fn exist(&self, path: &str) -> bool {
        let Ok(path) = self.gate.validate_path(path) else {
            return false;
        };
        fs::metadata(&path)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    /// Only removes empty directories.
    pub(crate) async fn delete(&self, path: &str) -> Result<u8, ClientError> {
        let path = self.gate.validate_path(path)?;
        fs::remove_dir(&path).await?;
        Ok(1)
    }
}

fn expand_glob(pattern: &str) -> Result<Vec<String>, ClientError> {
    let mut matches = Vec::new();

    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) => matches.push(path.to_string_lossy().into_owned()),
            Err(error) => {
                debug!(path = %error.path().display(), "skipping unreadable glob entry");
            }
        }
    }

    Ok(matches)
}
