//! Websocket transport: one binary frame per encoded message.

use std::sync::Arc;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{error::ClientError, protocol};

/// Subprotocol the server requires.
pub(crate) const SUBPROTOCOL: &str = "ws";

/// Inbound messages above this size are dropped.
pub(crate) const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// The socket itself fails on anything larger than this. Messages between
/// `MAX_FRAME_BYTES` and this ceiling are buffered in full, then dropped.
const MAX_BUFFERED_BYTES: usize = 16 * MAX_FRAME_BYTES;

pub(crate) const CLOSE_NORMAL: u16 = 1000;
pub(crate) const CLOSE_NO_STATUS: u16 = 1005;
pub(crate) const CLOSE_ABNORMAL: u16 = 1006;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Message(Map<String, Value>),
    Closed(u16),
}

/// Send half of the connection.
#[derive(Clone)]
pub(crate) struct MessageSender {
    sink: Arc<Mutex<SplitSink<Socket, Message>>>,
}

impl MessageSender {
    pub(crate) async fn send<T: Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let frame = protocol::encode(message)?;
        self.sink
            .lock()
            .await
            .send(Message::binary(frame))
            .await
            .map_err(|error| ClientError::Transport(error.to_string()))
    }
}

/// Receive half of the connection. Yields decoded messages in arrival order,
/// then a single `Closed`, then nothing.
pub(crate) struct MessageStream {
    source: SplitStream<Socket>,
    closed: bool,
}

impl MessageStream {
    pub(crate) async fn next(&mut self) -> Option<Inbound> {
        if self.closed {
            return None;
        }

        loop {
            let code = match self.source.next().await {
                Some(Ok(Message::Binary(frame))) => {
                    if frame.len() > MAX_FRAME_BYTES {
                        warn!(size = frame.len(), "discarding oversized frame");
                        continue;
                    }
                    match protocol::decode(&frame) {
                        Ok(message) => return Some(Inbound::Message(message)),
                        Err(error) => {
                            warn!(%error, "discarding undecodable frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Text(_))) => {
                    debug!("ignoring text frame");
                    continue;
                }
                Some(Ok(Message::Close(frame))) => frame
                    .map(|frame| u16::from(frame.code))
                    .unwrap_or(CLOSE_NO_STATUS),
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    warn!(%error, "websocket error");
                    CLOSE_ABNORMAL
                }
                None => CLOSE_ABNORMAL,
            };

            self.closed = true;
            info!(code, "connection closed");
            return Some(Inbound::Closed(code));
        }
    }
}

pub(crate) async fn connect(url: &str) -> Result<(MessageSender, MessageStream), ClientError> {
    let mut request = url
        .into_client_request()
        .map_err(|error| ClientError::Connection(error.to_string()))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

    let config = WebSocketConfig::default()
        .max_message_size(Some(MAX_BUFFERED_BYTES))
        .max_frame_size(Some(MAX_BUFFERED_BYTES));
    let (socket, _response) = connect_async_with_config(request, Some(config), false)
        .await
        .map_err(|error| ClientError::Connection(format!("{url}: {error}")))?;
    info!(url, "connected");

    let (sink, source) = socket.split();
    Ok((
        MessageSender {
            sink: Arc::new(Mutex::new(sink)),
        },
        MessageStream {
            source,
            closed: false,
        },
    ))
}
