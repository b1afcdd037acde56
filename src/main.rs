mod error;
mod protocol;
mod services;
mod transport;

use std::{env, path::PathBuf};

use clap::{CommandFactory, Parser, ValueEnum};
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::{
    error::ClientError,
    protocol::{
        Entitlement, EnvironmentVariablePermit, Initialization, PathPermit, Program,
        ResourceRequest, ResourceResponse, SchemePermit, ENTITLED_FILE_MODE,
    },
    services::{
        security::ALLOWED_ENV_VARS, BrowserLauncher, Console, ResourceDispatcher, SecurityGate,
    },
    transport::{Inbound, MessageSender, MessageStream, CLOSE_ABNORMAL, CLOSE_NORMAL},
};

pub(crate) const TERMINALWIRE_HOME_ENV: &str = "TERMINALWIRE_HOME";
pub(crate) const TERMINALWIRE_URL_ENV: &str = "TERMINALWIRE_URL";

/// Name reported to the server; set by the packaging build.
const APP_NAME: &str = match option_env!("TERMINALWIRE_APP_NAME") {
    Some(name) => name,
    None => "terminalwire",
};

const DEFAULT_URL: &str = match option_env!("TERMINALWIRE_DEFAULT_URL") {
    Some(url) => url,
    None => "ws://localhost:3000/terminal",
};

const ALLOWED_ROOT_DIR: &str = ".terminalwire";

const EXIT_SUCCESS: u8 = 0;
const EXIT_GENERAL_ERROR: u8 = 1;
const EXIT_CONNECTION_FAILED: u8 = 3;

#[derive(Parser)]
#[command(
    name = APP_NAME,
    version,
    about = "Runs a remote terminal program through a sandboxed local client.",
    disable_version_flag = true
)]
struct Cli {
    /// Print version.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Format of the client's own diagnostics on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    format: LogFormat,

    /// Arguments forwarded to the remote program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    arguments: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
struct ClientConfig {
    url: String,
    home: PathBuf,
    root: PathBuf,
    cwd: PathBuf,
}

impl ClientConfig {
    fn from_env() -> Result<Self, ClientError> {
        let cwd = env::current_dir().unwrap_or_default();
        Self::from_lookup(|name| env::var(name).ok(), cwd)
    }

    fn from_lookup<F>(lookup: F, cwd: PathBuf) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ClientError::configuration("HOME is not set"))?;

        let url = lookup(TERMINALWIRE_URL_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let root = lookup(TERMINALWIRE_HOME_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(ALLOWED_ROOT_DIR));

        Ok(Self {
            url,
            home,
            root,
            cwd,
        })
    }

    fn security_gate(&self) -> Result<SecurityGate, ClientError> {
        SecurityGate::new(self.home.clone(), self.root.clone(), self.cwd.clone())
    }
}

/// Builds the handshake entitlement from the same settings the gate
/// enforces.
fn entitlement_for(url: &str, gate: &SecurityGate) -> Entitlement {
    let authority = url
        .parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_string))
        .unwrap_or_default();

    let location = match gate.root().strip_prefix(gate.home()) {
        Ok(relative) if relative.as_os_str().is_empty() => "~/**/*".to_string(),
        Ok(relative) => format!("~/{}/**/*", relative.display()),
        Err(_) => format!("{}/**/*", gate.root().display()),
    };

    Entitlement {
        authority,
        schemes: ["http", "https"]
            .iter()
            .map(|scheme| SchemePermit {
                scheme: scheme.to_string(),
            })
            .collect(),
        paths: vec![PathPermit {
            location,
            mode: ENTITLED_FILE_MODE,
        }],
        environment_variables: ALLOWED_ENV_VARS
            .iter()
            .map(|name| EnvironmentVariablePermit {
                name: name.to_string(),
            })
            .collect(),
    }
}

/// Maps the end of a session to a process exit code.
///
/// A status from an `exit` message always wins, including an explicit 0 that
/// arrives before an abnormal close. Statuses outside `0..=255` become 1.
/// Without a status, close code 1000 is success and any other close is 1.
fn exit_code(exit_status: Option<i64>, close_code: u16) -> u8 {
    match exit_status {
        Some(status) => u8::try_from(status).unwrap_or(EXIT_GENERAL_ERROR),
        None if close_code == CLOSE_NORMAL => EXIT_SUCCESS,
        None => EXIT_GENERAL_ERROR,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.arguments.is_empty() {
        // Bare invocation prints help and succeeds.
        let _ = Cli::command().print_help();
        std::process::exit(i32::from(EXIT_SUCCESS));
    }
    init_tracing(cli.format);

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("{error}");
            std::process::exit(i32::from(EXIT_GENERAL_ERROR));
        }
    };

    let code = match run(&config, cli.arguments).await {
        Ok(code) => code,
        Err(error @ ClientError::Connection(_)) => {
            error!("{error}");
            EXIT_CONNECTION_FAILED
        }
        Err(error) => {
            error!("{error}");
            EXIT_GENERAL_ERROR
        }
    };

    // A pending stdin read would otherwise hold the runtime open.
    std::process::exit(i32::from(code));
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: &ClientConfig, arguments: Vec<String>) -> Result<u8, ClientError> {
    let dispatcher = ResourceDispatcher::new(
        config.security_gate()?,
        Console::stdio(),
        BrowserLauncher::platform_default(),
    );
    start_session(&config.url, arguments, dispatcher).await
}

/// Connects, sends the handshake as the first frame and serves the session.
async fn start_session(
    url: &str,
    arguments: Vec<String>,
    dispatcher: ResourceDispatcher,
) -> Result<u8, ClientError> {
    let handshake = Initialization::new(
        entitlement_for(url, dispatcher.gate()),
        Program {
            name: APP_NAME.to_string(),
            arguments,
        },
    );

    let (sender, inbound) = transport::connect(url).await?;
    sender.send(&handshake).await?;

    Ok(drive_session(&sender, inbound, dispatcher).await)
}

/// Handles inbound messages one at a time until the connection closes and
/// returns the process exit code.
async fn drive_session(
    sender: &MessageSender,
    mut inbound: MessageStream,
    mut dispatcher: ResourceDispatcher,
) -> u8 {
    let mut exit_status = None;

    while let Some(event) = inbound.next().await {
        match event {
            Inbound::Message(message) => {
                handle_message(message, sender, &mut dispatcher, &mut exit_status).await;
            }
            Inbound::Closed(code) => return exit_code(exit_status, code),
        }
    }

    exit_code(exit_status, CLOSE_ABNORMAL)
}

async fn handle_message(
    message: Map<String, Value>,
    sender: &MessageSender,
    dispatcher: &mut ResourceDispatcher,
    exit_status: &mut Option<i64>,
) {
    match message.get("event").and_then(Value::as_str) {
        Some("resource") => {
            let name = message
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);

            let response = match serde_json::from_value::<ResourceRequest>(Value::Object(message)) {
                Ok(request) => {
                    dispatcher
                        .handle_resource(&request.name, &request.command, &request.parameters)
                        .await
                }
                Err(error) => {
                    warn!(%error, "malformed resource request");
                    // Without a name there is no envelope the server could match.
                    let Some(name) = name.as_deref() else {
                        return;
                    };
                    let error = ClientError::invalid_params(&error.to_string());
                    ResourceResponse::failure(name, error.to_string())
                }
            };

            if let Err(error) = sender.send(&response).await {
                warn!(%error, resource = %response.name, "failed to send resource response");
            }
        }
        Some("exit") => {
            let status = message.get("status").and_then(Value::as_i64);
            info!(?status, "server requested exit");
            *exit_status = status;
        }
        Some(other) => debug!(event = other, "ignoring event"),
        None => debug!("ignoring message without event"),
    }
}
