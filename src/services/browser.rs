use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::error::ClientError;

#[derive(Clone)]
pub(crate) struct BrowserLauncher {
    program: String,
}

impl BrowserLauncher {
    pub(crate) fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub(crate) fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("open")
        } else {
            Self::new("xdg-open")
        }
    }

    /// Hands `url` to the opener and returns without waiting. The opener runs
    /// in its own process group so it outlives the client.
    pub(crate) fn launch(&self, url: &str) -> Result<(), ClientError> {
        let child = Command::new(&self.program)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(false)
            .spawn()?;

        info!(program = %self.program, pid = ?child.id(), "launched browser");
        Ok(())
    }
}
