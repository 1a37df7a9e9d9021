use crate::{
    errors::{IoError, WsError},
    limits::WsLimits,
    routing::middleware::BoxFuture,
    server::connection::Connection,
    ws::frame::{self, Frame, FrameError, Opcode},
};
use std::future::Future;
use std::net::SocketAddr;

/// A complete, reassembled WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// What [`WebSocketConnection::receive`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Message(WsMessage),
    /// The peer initiated the close handshake; the echo close has already
    /// been sent. The carried code is the peer's, when it sent one.
    Close(Option<u16>),
}

/// Why a receive or send failed.
#[derive(Debug)]
pub enum WsStreamError {
    /// Transport failure, including cancellation on server shutdown.
    Io(IoError),
    /// The peer violated the framing protocol; a close frame with the
    /// appropriate code was sent before this was returned.
    Protocol(WsError),
}

impl From<IoError> for WsStreamError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

/// A handler owning an upgraded WebSocket connection.
///
/// Implemented automatically for `async fn(WebSocketConnection)` and
/// closures of the same shape.
pub trait WsHandler: Send + Sync + 'static {
    fn call(&self, ws: WebSocketConnection) -> BoxFuture<'static, ()>;
}

impl<F, Fut> WsHandler for F
where
    F: Fn(WebSocketConnection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    #[inline]
    fn call(&self, ws: WebSocketConnection) -> BoxFuture<'static, ()> {
        Box::pin(self(ws))
    }
}

/// An upgraded WebSocket connection, exclusively owned by its handler.
///
/// Obtained by registering a handler with
/// [`Server::ws`](crate::Server::ws); the connection loop completes the
/// handshake and hands ownership here. When the handler returns — or
/// unwinds — and the close handshake has not happened yet, a close frame
/// with code 1000 is sent before the socket is dropped.
///
/// ```no_run
/// use relay_web::{Server, WsEvent, WsMessage};
///
/// let mut server = Server::new();
/// server.ws("/echo", |mut ws| async move {
///     while let Ok(WsEvent::Message(msg)) = ws.receive().await {
///         match msg {
///             WsMessage::Text(text) => {
///                 let _ = ws.send_text(&text).await;
///             }
///             WsMessage::Binary(data) => {
///                 let _ = ws.send_binary(&data).await;
///             }
///         }
///     }
/// });
/// ```
pub struct WebSocketConnection {
    conn: Option<Connection>,
    peer_addr: SocketAddr,
    limits: WsLimits,
    close_sent: bool,
    peer_closed: bool,

    // Reassembly state for the fragmented message in flight.
    assembling: Option<(Opcode, Vec<u8>)>,
}

impl WebSocketConnection {
    pub(crate) fn new(conn: Connection, limits: WsLimits) -> Self {
        Self {
            peer_addr: conn.remote_addr(),
            conn: Some(conn),
            limits,
            close_sent: false,
            peer_closed: false,
            assembling: None,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.conn.as_ref().map(Connection::is_open).unwrap_or(false) && !self.peer_closed
    }

    #[inline(always)]
    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Receives the next complete message.
    ///
    /// Control frames arriving between fragments are handled inline: a
    /// ping is answered with a pong carrying the identical payload, a
    /// close is echoed and surfaces as [`WsEvent::Close`]. Cancellation
    /// on server shutdown surfaces as a cancelled [`WsStreamError::Io`].
    pub async fn receive(&mut self) -> Result<WsEvent, WsStreamError> {
        loop {
            let limits = self.limits.clone();
            let frame = match frame::read_frame(self.conn_mut(), &limits).await {
                Ok(frame) => frame,
                Err(err) => return self.fail(err).await,
            };

            match frame.opcode {
                Opcode::Ping => {
                    self.write_frame(Opcode::Pong, &frame.payload).await?;
                }
                Opcode::Pong => {}
                Opcode::Close => {
                    let code = parse_close_code(&frame.payload);
                    self.peer_closed = true;
                    if !self.close_sent {
                        // Echo the peer's close payload back.
                        self.close_sent = true;
                        let _ = self.write_frame(Opcode::Close, &frame.payload).await;
                    }
                    self.conn_mut().close().await;
                    return Ok(WsEvent::Close(code));
                }
                Opcode::Text | Opcode::Binary => {
                    if self.assembling.is_some() {
                        return self.protocol_close(1002, WsError::InvalidFrame).await;
                    }
                    if frame.payload.len() > self.limits.max_message_size {
                        return self.protocol_close(1009, WsError::MessageTooLarge).await;
                    }
                    if frame.fin {
                        return self.finish_message(frame).await;
                    }
                    self.assembling = Some((frame.opcode, frame.payload));
                }
                Opcode::Continuation => {
                    let Some((_, buffer)) = self.assembling.as_mut() else {
                        return self.protocol_close(1002, WsError::InvalidFrame).await;
                    };
                    if buffer.len() + frame.payload.len() > self.limits.max_message_size {
                        return self.protocol_close(1009, WsError::MessageTooLarge).await;
                    }
                    buffer.extend_from_slice(&frame.payload);

                    if frame.fin {
                        let (opcode, buffer) = self.assembling.take().unwrap();
                        return self
                            .finish_message(Frame {
                                fin: true,
                                opcode,
                                payload: buffer,
                            })
                            .await;
                    }
                }
            }
        }
    }

    /// Sends a text message in a single frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), WsStreamError> {
        self.write_frame(Opcode::Text, text.as_bytes()).await
    }

    /// Sends a binary message in a single frame.
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), WsStreamError> {
        self.write_frame(Opcode::Binary, data).await
    }

    /// Initiates the close handshake with the given code.
    pub async fn close(&mut self, code: u16) -> Result<(), WsStreamError> {
        if !self.close_sent {
            self.close_sent = true;
            let payload = frame::close_payload(code, "");
            self.write_frame(Opcode::Close, &payload).await?;
        }
        Ok(())
    }
}

// The graceful-close guarantee: a handler that returns (or panics)
// without closing still produces a 1000 close frame.
impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !conn.is_open() {
            return;
        }

        let close_sent = self.close_sent;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if !close_sent {
                    let mut raw = Vec::new();
                    frame::encode_frame(
                        &mut raw,
                        true,
                        Opcode::Close,
                        &frame::close_payload(1000, ""),
                    );
                    let _ = conn.write_all(&raw).await;
                }
                conn.close().await;
            });
        }
    }
}

// Internal machinery
impl WebSocketConnection {
    #[inline]
    fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }

    async fn finish_message(&mut self, frame: Frame) -> Result<WsEvent, WsStreamError> {
        let message = match frame.opcode {
            Opcode::Binary => WsMessage::Binary(frame.payload),
            Opcode::Text => match simdutf8::basic::from_utf8(&frame.payload) {
                // 1007: invalid payload data for the declared type.
                Err(_) => return self.protocol_close(1007, WsError::InvalidFrame).await,
                // SAFETY: validated as UTF-8 just above.
                Ok(_) => WsMessage::Text(unsafe { String::from_utf8_unchecked(frame.payload) }),
            },
            _ => unreachable!("finish_message only sees data opcodes"),
        };

        Ok(WsEvent::Message(message))
    }

    async fn fail(&mut self, err: FrameError) -> Result<WsEvent, WsStreamError> {
        let code = err.close_code().unwrap_or(1002);
        match err {
            FrameError::Io(io) => Err(WsStreamError::Io(io)),
            FrameError::Protocol(ws) | FrameError::TooLarge(ws) => {
                self.protocol_close(code, ws).await
            }
        }
    }

    async fn protocol_close(
        &mut self,
        code: u16,
        err: WsError,
    ) -> Result<WsEvent, WsStreamError> {
        if !self.close_sent {
            self.close_sent = true;
            let payload = frame::close_payload(code, "");
            let mut raw = Vec::with_capacity(payload.len() + 4);
            frame::encode_frame(&mut raw, true, Opcode::Close, &payload);
            let _ = self.conn_mut().write_all(&raw).await;
        }
        self.conn_mut().close().await;
        Err(WsStreamError::Protocol(err))
    }

    async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsStreamError> {
        let mut raw = Vec::with_capacity(payload.len() + 10);
        frame::encode_frame(&mut raw, true, opcode, payload);
        self.conn_mut()
            .write_all(&raw)
            .await
            .map_err(WsStreamError::from)
    }
}

#[inline]
fn parse_close_code(payload: &[u8]) -> Option<u16> {
    match payload {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::test_support::memory_pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn masked_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [0x11u8, 0x22, 0x33, 0x44];
        let mut raw = vec![if fin { 0x80 | opcode } else { opcode }];
        match payload.len() {
            len @ 0..=125 => raw.push(0x80 | len as u8),
            len @ 126..=65_535 => {
                raw.push(0x80 | 126);
                raw.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                raw.push(0x80 | 127);
                raw.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        raw.extend_from_slice(&mask);
        raw.extend(
            payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4]),
        );
        raw
    }

    fn socket() -> (WebSocketConnection, tokio::io::DuplexStream) {
        let (conn, client) = memory_pair();
        (
            WebSocketConnection::new(conn, WsLimits::default()),
            client,
        )
    }

    #[tokio::test]
    async fn receives_single_frame_text() {
        let (mut ws, mut client) = socket();
        client
            .write_all(&masked_frame(true, 0x1, b"hi there"))
            .await
            .unwrap();

        let event = ws.receive().await.unwrap();
        assert_eq!(event, WsEvent::Message(WsMessage::Text("hi there".into())));
    }

    #[tokio::test]
    async fn reassembles_fragmented_message() {
        let (mut ws, mut client) = socket();
        client
            .write_all(&masked_frame(false, 0x1, b"Hel"))
            .await
            .unwrap();
        client
            .write_all(&masked_frame(false, 0x0, b"lo "))
            .await
            .unwrap();
        client
            .write_all(&masked_frame(true, 0x0, b"World"))
            .await
            .unwrap();

        let event = ws.receive().await.unwrap();
        assert_eq!(
            event,
            WsEvent::Message(WsMessage::Text("Hello World".into()))
        );
    }

    #[tokio::test]
    async fn ping_between_fragments_answered_inline() {
        let (mut ws, mut client) = socket();
        client
            .write_all(&masked_frame(false, 0x1, b"He"))
            .await
            .unwrap();
        client
            .write_all(&masked_frame(true, 0x9, b"probe"))
            .await
            .unwrap();
        client
            .write_all(&masked_frame(true, 0x0, b"llo"))
            .await
            .unwrap();

        let event = ws.receive().await.unwrap();
        assert_eq!(event, WsEvent::Message(WsMessage::Text("Hello".into())));

        // The pong went out before the message completed, identical
        // payload, unmasked.
        let mut reply = vec![0u8; 7];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x8A, 0x05, b'p', b'r', b'o', b'b', b'e']);
    }

    #[tokio::test]
    async fn close_is_echoed() {
        let (mut ws, mut client) = socket();
        let payload = frame::close_payload(1001, "going away");
        client
            .write_all(&masked_frame(true, 0x8, &payload))
            .await
            .unwrap();

        let event = ws.receive().await.unwrap();
        assert_eq!(event, WsEvent::Close(Some(1001)));
        assert!(!ws.is_open());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0x88);
        assert_eq!(&reply[2..4], &1001u16.to_be_bytes());
    }

    #[tokio::test]
    async fn continuation_without_start_is_protocol_error() {
        let (mut ws, mut client) = socket();
        client
            .write_all(&masked_frame(true, 0x0, b"orphan"))
            .await
            .unwrap();

        let err = ws.receive().await.unwrap_err();
        assert!(matches!(err, WsStreamError::Protocol(WsError::InvalidFrame)));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(&reply[2..4], &1002u16.to_be_bytes());
    }

    #[tokio::test]
    async fn invalid_utf8_text_closes_1007() {
        let (mut ws, mut client) = socket();
        client
            .write_all(&masked_frame(true, 0x1, &[0xFF, 0xFE]))
            .await
            .unwrap();

        let err = ws.receive().await.unwrap_err();
        assert!(matches!(err, WsStreamError::Protocol(WsError::InvalidFrame)));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(&reply[2..4], &1007u16.to_be_bytes());
    }

    #[tokio::test]
    async fn send_paths_are_unmasked() {
        let (mut ws, mut client) = socket();

        ws.send_text("yo").await.unwrap();
        ws.send_binary(&[1, 2, 3]).await.unwrap();

        let mut bytes = vec![0u8; 4 + 5];
        client.read_exact(&mut bytes).await.unwrap();
        assert_eq!(&bytes[..4], &[0x81, 0x02, b'y', b'o']);
        assert_eq!(&bytes[4..], &[0x82, 0x03, 1, 2, 3]);
    }

    #[tokio::test]
    async fn drop_sends_close_1000() {
        let (ws, mut client) = socket();
        drop(ws);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0x88);
        assert_eq!(&reply[2..4], &1000u16.to_be_bytes());
    }

    #[tokio::test]
    async fn explicit_close_suppresses_drop_close() {
        let (mut ws, mut client) = socket();
        ws.close(4000).await.unwrap();
        drop(ws);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        // Exactly one close frame, with the explicit code.
        assert_eq!(reply.len(), 4);
        assert_eq!(&reply[2..4], &4000u16.to_be_bytes());
    }
}
