use std::{fs::Permissions, io::ErrorKind, os::unix::fs::PermissionsExt};

use tokio::fs;

use super::SecurityGate;
use crate::error::ClientError;

/// File commands, all confined to the gate's allowed root.
#[derive(Clone)]
pub(crate) struct FileResource {
    gate: SecurityGate,
}

impl FileResource {
    pub(crate) fn new(gate: SecurityGate) -> Self {
        Self { gate }
    }

    pub(crate) async fn read(&self, path: &str) -> Result<String, ClientError> {
        let path = self.gate.validate_path(path)?;
        Ok(fs::read_to_string(&path).await?)
    }

    /// Returns the byte length of `content`.
    pub(crate) async fn write(
        &self,
        path: &str,
        content: &str,
        mode: Option<u32>,
    ) -> Result<usize, ClientError> {
        let path = self.gate.validate_path(path)?;
        fs::write(&path, content).await?;
        if let Some(mode) = mode {
            fs::set_permissions(&path, Permissions::from_mode(mode)).await?;
        }
        Ok(content.len())
    }

    /// Read-modify-write; not atomic against other writers.
    pub(crate) async fn append(&self, path: &str, content: &str) -> Result<usize, ClientError> {
        let path = self.gate.validate_path(path)?;
        let mut combined = match fs::read_to_string(&path).await {
            Ok(existing) => existing,
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(error) => return Err(error.into()),
        };
        combined.push_str(content);
        fs::write(&path, combined).await?;
        Ok(content.len())
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<u8, ClientError> {
        let path = self.gate.validate_path(path)?;
        fs::remove_file(&path).await?;
        Ok(1)
    }

    /// Denied and missing paths both report `false`.
    pub(crate) async fn exist(&self, path: &str) -> bool {
        let Ok(path) = self.gate.validate_path(path) else {
            return false;
        };
        fs::try_exists(&path).await.unwrap_or(false)
    }

    pub(crate) async fn change_mode(&self, path: &str, mode: u32) -> Result<u8, ClientError> {
        let path = self.gate.validate_path(path)?;
        fs::set_permissions(&path, Permissions::from_mode(mode)).await?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::FileResource;
    use crate::{error::ClientError, services::SecurityGate};
    use std::os::unix::fs::PermissionsExt;

    fn fixture() -> (tempfile::TempDir, FileResource) {
        let home = tempfile::tempdir().expect("tempdir");
        let root = home.path().join(".terminalwire");
        std::fs::create_dir_all(&root).expect("create root");
        let gate = SecurityGate::new(home.path().to_path_buf(), root, home.path().to_path_buf())
            .expect("gate");
        (home, FileResource::new(gate))
    }

    #[tokio::test]
    async fn write_then_read_returns_same_content() {
        let (_home, files) = fixture();
        let written = files
            .write("~/.terminalwire/t.txt", "hi", None)
            .await
            .expect("write");
        assert_eq!(written, 2);
        assert_eq!(files.read("~/.terminalwire/t.txt").await.expect("read"), "hi");
    }

    #[tokio::test]
    async fn append_concatenates_without_separator() {
        let (_home, files) = fixture();
        files
            .write("~/.terminalwire/log", "A", None)
            .await
            .expect("write");
        assert_eq!(
            files.append("~/.terminalwire/log", "B").await.expect("append"),
            1
        );
        assert_eq!(files.read("~/.terminalwire/log").await.expect("read"), "AB");
    }

    #[tokio::test]
    async fn append_creates_missing_file() {
        let (_home, files) = fixture();
        files
            .append("~/.terminalwire/new", "line")
            .await
            .expect("append");
        assert_eq!(files.read("~/.terminalwire/new").await.expect("read"), "line");
    }

    #[tokio::test]
    async fn write_applies_mode_and_change_mode_updates_it() {
        let (home, files) = fixture();
        files
            .write("~/.terminalwire/secret", "x", Some(0o600))
            .await
            .expect("write");
        let on_disk = home.path().join(".terminalwire/secret");
        let mode = std::fs::metadata(&on_disk).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        assert_eq!(
            files
                .change_mode("~/.terminalwire/secret", 0o640)
                .await
                .expect("chmod"),
            0
        );
        let mode = std::fs::metadata(&on_disk).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn exist_is_false_for_missing_and_denied_paths() {
        let (_home, files) = fixture();
        files
            .write("~/.terminalwire/here", "", None)
            .await
            .expect("write");
        assert!(files.exist("~/.terminalwire/here").await);
        assert!(!files.exist("~/.terminalwire/missing").await);
        assert!(!files.exist("../../etc/passwd").await);
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_home, files) = fixture();
        files
            .write("~/.terminalwire/gone", "x", None)
            .await
            .expect("write");
        assert_eq!(files.delete("~/.terminalwire/gone").await.expect("delete"), 1);
        assert!(!files.exist("~/.terminalwire/gone").await);
    }

    #[tokio::test]
    async fn read_outside_root_is_denied() {
        let (_home, files) = fixture();
        let error = files.read("~/.bashrc").await.expect_err("denied");
        assert!(matches!(error, ClientError::AccessDenied(_)));
    }
}
