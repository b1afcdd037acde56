//! Wire messages and the MessagePack codec.
//!
//! Outbound messages are typed structs; inbound messages stay loosely typed
//! (`serde_json::Value` maps keyed by `event`) until the session driver picks
//! them apart.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

pub(crate) const PROTOCOL_VERSION: &str = "0.1.0";

/// Entitlement mode advertised for files under the allowed root.
pub(crate) const ENTITLED_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Initialization {
    event: &'static str,
    protocol: ProtocolInfo,
    entitlement: Entitlement,
    program: Program,
}

impl Initialization {
    pub(crate) fn new(entitlement: Entitlement, program: Program) -> Self {
        Self {
            event: "initialization",
            protocol: ProtocolInfo {
                version: PROTOCOL_VERSION.to_string(),
            },
            entitlement,
            program,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProtocolInfo {
    version: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Program {
    pub(crate) name: String,
    pub(crate) arguments: Vec<String>,
}

/// Declarative capability manifest sent with the handshake. The client does
/// not enforce it; the security gate does its own checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Entitlement {
    pub(crate) authority: String,
    pub(crate) schemes: Vec<SchemePermit>,
    pub(crate) paths: Vec<PathPermit>,
    pub(crate) environment_variables: Vec<EnvironmentVariablePermit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SchemePermit {
    pub(crate) scheme: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PathPermit {
    pub(crate) location: String,
    pub(crate) mode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EnvironmentVariablePermit {
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResourceRequest {
    pub(crate) name: String,
    pub(crate) command: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) parameters: Map<String, Value>,
}

/// `parameters: null` means no parameters.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ResponseStatus {
    Success,
    Failure,
}

/// Envelope returned for every resource command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ResourceResponse {
    pub(crate) event: &'static str,
    pub(crate) name: String,
    pub(crate) status: ResponseStatus,
    pub(crate) response: Value,
}

impl ResourceResponse {
    pub(crate) fn success(name: &str, response: Value) -> Self {
        Self {
            event: "resource",
            name: name.to_string(),
            status: ResponseStatus::Success,
            response,
        }
    }

    pub(crate) fn failure(name: &str, message: String) -> Self {
        Self {
            event: "resource",
            name: name.to_string(),
            status: ResponseStatus::Failure,
            response: Value::String(message),
        }
    }
}

/// Encodes `message` as a MessagePack map with named keys.
pub(crate) fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ClientError> {
    rmp_serde::to_vec_named(message).map_err(|error| ClientError::Codec(error.to_string()))
}

/// Decodes one frame into a message map. The map must carry an `event`
/// string.
pub(crate) fn decode(frame: &[u8]) -> Result<Map<String, Value>, ClientError> {
    let value: Value =
        rmp_serde::from_slice(frame).map_err(|error| ClientError::Codec(error.to_string()))?;

    let Value::Object(message) = value else {
        return Err(ClientError::Codec("message is not a map".to_string()));
    };

    if !message.get("event").is_some_and(Value::is_string) {
        return Err(ClientError::Codec("message has no event".to_string()));
    }

    Ok(message)
}
