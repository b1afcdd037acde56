use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{
    BrowserLauncher, Console, DirectoryResource, FileResource, PasswordInput, SecurityGate,
};
use crate::{error::ClientError, protocol::ResourceResponse};

/// Local capabilities the server can address by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Stdout,
    Stderr,
    Stdin,
    File,
    Directory,
    Browser,
    EnvironmentVariable,
}

impl ResourceKind {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "stdin" => Some(Self::Stdin),
            "file" => Some(Self::File),
            "directory" => Some(Self::Directory),
            "browser" => Some(Self::Browser),
            "environment_variable" => Some(Self::EnvironmentVariable),
            _ => None,
        }
    }
}

pub(crate) struct ResourceDispatcher {
    gate: SecurityGate,
    console: Console,
    files: FileResource,
    directories: DirectoryResource,
    browser: BrowserLauncher,
}

impl ResourceDispatcher {
    pub(crate) fn new(gate: SecurityGate, console: Console, browser: BrowserLauncher) -> Self {
        Self {
            files: FileResource::new(gate.clone()),
            directories: DirectoryResource::new(gate.clone()),
            gate,
            console,
            browser,
        }
    }

    pub(crate) fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    /// Runs one resource command. Errors never escape; they come back as a
    /// failure envelope carrying the error text.
    pub(crate) async fn handle_resource(
        &mut self,
        name: &str,
        command: &str,
        parameters: &Map<String, Value>,
    ) -> ResourceResponse {
        match self.execute(name, command, parameters).await {
            Ok(response) => ResourceResponse::success(name, response),
            Err(error) => {
                debug!(resource = name, command, %error, "resource command failed");
                let mut message = error.to_string();
                if message.is_empty() {
                    message = format!("{error:?}");
                }
                ResourceResponse::failure(name, message)
            }
        }
    }

    async fn execute(
        &mut self,
        name: &str,
        command: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let kind =
            ResourceKind::from_name(name).ok_or_else(|| ClientError::unsupported(name, command))?;

        match (kind, command) {
            // stderr shares the stdout stream.
            (ResourceKind::Stdout | ResourceKind::Stderr, "print") => {
                self.console.print(read_string(parameters, "data")?).await?;
                Ok(Value::Null)
            }
            (ResourceKind::Stdout | ResourceKind::Stderr, "print_line") => {
                self.console
                    .print_line(read_string(parameters, "data")?)
                    .await?;
                Ok(Value::Null)
            }
            (ResourceKind::Stdin, "read_line") => Ok(json!(self.console.read_line().await?)),
            (ResourceKind::Stdin, "read_password") => match self.console.read_password().await? {
                PasswordInput::Line(password) => Ok(json!(password)),
                PasswordInput::Interrupted => {
                    warn!("password prompt interrupted");
                    std::process::exit(1);
                }
            },
            (ResourceKind::File, "read") => {
                Ok(json!(self.files.read(read_string(parameters, "path")?).await?))
            }
            (ResourceKind::File, "write") => {
                let written = self
                    .files
                    .write(
                        read_string(parameters, "path")?,
                        read_string(parameters, "content")?,
                        read_mode(parameters)?,
                    )
                    .await?;
                Ok(json!(written))
            }
            (ResourceKind::File, "append") => {
                let appended = self
                    .files
                    .append(
                        read_string(parameters, "path")?,
                        read_string(parameters, "content")?,
                    )
                    .await?;
                Ok(json!(appended))
            }
            (ResourceKind::File, "delete") => {
                Ok(json!(self.files.delete(read_string(parameters, "path")?).await?))
            }
            (ResourceKind::File, "exist") => {
                Ok(json!(self.files.exist(read_string(parameters, "path")?).await))
            }
            (ResourceKind::File, "change_mode") => {
                let mode = read_mode(parameters)?
                    .ok_or_else(|| ClientError::invalid_params("mode is required"))?;
                let result = self
                    .files
                    .change_mode(read_string(parameters, "path")?, mode)
                    .await?;
                Ok(json!(result))
            }
            (ResourceKind::Directory, "list") => {
                Ok(json!(
                    self.directories
                        .list(read_string(parameters, "path")?)
                        .await?
                ))
            }
            (ResourceKind::Directory, "create") => Ok(json!(
                self.directories
                    .create(read_string(parameters, "path")?)
                    .await?
            )),
            (ResourceKind::Directory, "exist") => Ok(json!(
                self.directories
                    .exist(read_string(parameters, "path")?)
                    .await
            )),
            (ResourceKind::Directory, "delete") => Ok(json!(
                self.directories
                    .delete(read_string(parameters, "path")?)
                    .await?
            )),
            (ResourceKind::Browser, "launch") => {
                self.browser.launch(read_string(parameters, "url")?)?;
                Ok(Value::Null)
            }
            (ResourceKind::EnvironmentVariable, "read") => Ok(json!(self
                .gate
                .read_env_var(read_string(parameters, "name")?)?)),
            _ => Err(ClientError::unsupported(name, command)),
        }
    }
}

fn read_string<'a>(parameters: &'a Map<String, Value>, key: &str) -> Result<&'a str, ClientError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::invalid_params(&format!("{key} must be a string")))
}

/// Accepts an integer (`420`) or an octal string (`"644"`, `"0o644"`).
fn read_mode(parameters: &Map<String, Value>) -> Result<Option<u32>, ClientError> {
    let invalid = || ClientError::invalid_params("mode must be a permission number");

    match parameters.get("mode") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|mode| u32::try_from(mode).ok())
            .filter(|mode| *mode <= 0o7777)
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(raw)) => {
            let digits = raw.trim().trim_start_matches("0o");
            u32::from_str_radix(digits, 8)
                .ok()
                .filter(|mode| *mode <= 0o7777)
                .map(Some)
                .ok_or_else(invalid)
        }
        Some(_) => Err(invalid()),
    }
}
