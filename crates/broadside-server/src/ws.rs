//! WebSocket adapter for the transport seam.

use std::io::ErrorKind;

use async_trait::async_trait;
use broadside_protocol::SessionId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::transport::{Connection, FrameSink, FrameStream, TransportError};

/// Query parameter carrying the session a client wants to resume.
pub const SESSION_QUERY_PARAM: &str = "sessionID";

type Socket = WebSocketStream<TcpStream>;

/// Performs the WebSocket upgrade, capturing the requested session id from the URI.
pub async fn accept(stream: TcpStream) -> Result<(Connection, Option<SessionId>), TransportError> {
    let mut requested = None;
    let socket = accept_hdr_async(stream, |request: &Request, response: Response| {
        requested = session_param(request.uri().query());
        Ok::<Response, ErrorResponse>(response)
    })
    .await
    .map_err(map_ws_error)?;

    let (sink, stream) = socket.split();
    let connection = Connection::new(Box::new(WsSink(sink)), Box::new(WsStream(stream)));
    Ok((connection, requested))
}

/// Extracts a non-empty `sessionID` from a raw query string.
pub fn session_param(query: Option<&str>) -> Option<SessionId> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == SESSION_QUERY_PARAM && !value.is_empty())
        .map(|(_, value)| SessionId::new(value))
}

struct WsSink(SplitSink<Socket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await.map_err(map_ws_error)
    }
}

struct WsStream(SplitStream<Socket>);

#[async_trait]
impl FrameStream for WsStream {
    async fn recv_text(&mut self) -> Result<String, TransportError> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(_))) => return Err(TransportError::UnsupportedData),
                // Pongs are queued by tungstenite and flushed with the next write.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => return Err(close_error(frame.as_ref())),
                Some(Err(err)) => return Err(map_ws_error(err)),
                None => return Err(TransportError::AbnormalClosure),
            }
        }
    }
}

fn close_error(frame: Option<&CloseFrame<'_>>) -> TransportError {
    match frame.map(|frame| frame.code) {
        Some(CloseCode::Abnormal) => TransportError::AbnormalClosure,
        _ => TransportError::NormalClosure,
    }
}

pub fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::NormalClosure,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::AbnormalClosure
        }
        WsError::Protocol(other) => TransportError::Protocol(other.to_string()),
        WsError::Io(io) => match io.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportError::AbnormalClosure,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            _ => TransportError::Other(io.to_string()),
        },
        WsError::WriteBufferFull(_) => TransportError::ServerBusy,
        WsError::Utf8 => TransportError::UnsupportedData,
        other => TransportError::Other(other.to_string()),
    }
}
