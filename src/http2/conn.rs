//! The HTTP/2 connection engine: preface and SETTINGS exchange, the
//! frame loop, stream bookkeeping, flow-controlled response writes, and
//! dispatch into the routing pipeline. Server push is never offered.

use crate::{
    errors::{Http2Error, IoError, IoErrorKind},
    http::query::{decode_str, Query},
    http::request::Request,
    http::response::{Body, Response},
    http::types::{Method, StatusCode, Version},
    http2::frame::{self, FrameHeader, Settings},
    http2::hpack::{Decoder, Encoder},
    http2::stream::{ConnectionWindows, Stream, StreamState},
    server::connection::Connection,
    server::server_impl::AppState,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Serves a connection whose transport negotiated `h2` via ALPN.
pub(crate) async fn serve(mut conn: Connection, app: Arc<AppState>) {
    conn.set_timeout(app.limits.conn.connection_lifetime);
    conn.set_cancel_token(app.cancel.token());

    if read_preface(&mut conn).await.is_err() {
        conn.close().await;
        return;
    }

    Engine::new(conn, app).run(None).await;
}

/// Serves an h2c upgrade: the 101 response is already on the wire, the
/// `HTTP2-Settings` payload is decoded into the peer settings, and the
/// upgrade request becomes stream 1 in the half-closed (remote) state.
pub(crate) async fn serve_upgraded(
    mut conn: Connection,
    app: Arc<AppState>,
    request: Request,
    settings_payload: &[u8],
) {
    conn.set_timeout(app.limits.conn.connection_lifetime);
    conn.set_cancel_token(app.cancel.token());

    if read_preface(&mut conn).await.is_err() {
        conn.close().await;
        return;
    }

    let mut engine = Engine::new(conn, app);
    if engine.peer_settings.apply(settings_payload).is_err() {
        engine.conn.close().await;
        return;
    }
    engine.run(Some(request)).await;
}

/// Decodes an `HTTP2-Settings` header value (base64url of a SETTINGS
/// payload). `None` marks an invalid upgrade.
pub(crate) fn decode_upgrade_settings(value: &str) -> Option<Vec<u8>> {
    let payload = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
    match payload.len() % 6 {
        0 => Some(payload),
        _ => None,
    }
}

async fn read_preface(conn: &mut Connection) -> Result<(), ()> {
    let mut preface = [0u8; 24];
    match conn.read_exact(&mut preface).await {
        Ok(()) if &preface == frame::PREFACE => Ok(()),
        _ => Err(()),
    }
}

#[derive(Debug)]
enum EngineError {
    Io(IoError),
    /// Connection error: GOAWAY and close.
    Conn(Http2Error),
    /// Stream error: RST_STREAM and carry on.
    Stream(u32, Http2Error),
}

impl From<IoError> for EngineError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

/// An in-flight response whose DATA is gated by flow control.
struct PendingSend {
    stream_id: u32,
    data: Vec<u8>,
    sent: usize,
}

struct Engine {
    conn: Connection,
    app: Arc<AppState>,
    decoder: Decoder,
    peer_settings: Settings,
    windows: ConnectionWindows,
    streams: HashMap<u32, Stream>,
    last_stream_id: u32,
    goaway_received: bool,

    /// In-flight handler count; the loop may not exit while > 0.
    dispatched: usize,

    /// Header block under CONTINUATION assembly:
    /// (stream id, END_STREAM flag, fragment).
    assembling: Option<(u32, bool, Vec<u8>)>,

    pending: Vec<PendingSend>,
    respond_tx: mpsc::Sender<(u32, Response)>,
    respond_rx: mpsc::Receiver<(u32, Response)>,
}

impl Engine {
    fn new(conn: Connection, app: Arc<AppState>) -> Self {
        let (respond_tx, respond_rx) = mpsc::channel(32);
        let header_table = app.limits.http2.header_table_size;
        let initial_window = app.limits.http2.initial_window_size;

        Self {
            conn,
            app,
            decoder: Decoder::new(header_table),
            peer_settings: Settings::default(),
            windows: ConnectionWindows::new(initial_window),
            streams: HashMap::new(),
            last_stream_id: 0,
            goaway_received: false,
            dispatched: 0,
            assembling: None,
            pending: Vec::new(),
            respond_tx,
            respond_rx,
        }
    }

    async fn run(mut self, upgraded: Option<Request>) {
        let settings = frame::server_settings(
            self.app.limits.http2.header_table_size,
            self.app.limits.http2.max_concurrent_streams,
            self.app.limits.http2.initial_window_size,
            self.app.limits.http2.max_frame_size,
        );
        if self.conn.write_all(&settings).await.is_err() {
            self.conn.close().await;
            return;
        }

        if let Some(request) = upgraded {
            let mut stream = Stream::new(
                1,
                self.peer_settings.initial_window_size,
                self.app.limits.http2.initial_window_size,
            );
            stream.state = StreamState::HalfClosedRemote;
            self.streams.insert(1, stream);
            self.last_stream_id = 1;
            self.dispatch(1, request);
        }

        let outcome = self.frame_loop().await;

        let code = match outcome {
            Ok(()) => frame::NO_ERROR,
            Err(EngineError::Io(err)) => {
                if !err.is_cancelled() {
                    tracing::debug!(%err, "http2 connection ended");
                }
                frame::NO_ERROR
            }
            Err(EngineError::Conn(err)) => {
                tracing::warn!(?err, "http2 connection error");
                err.code()
            }
            Err(EngineError::Stream(..)) => unreachable!("stream errors are handled in the loop"),
        };

        let mut out = Vec::new();
        frame::goaway(&mut out, self.last_stream_id, code);
        let _ = self.conn.write_all(&out).await;
        self.conn.close().await;
    }

    async fn frame_loop(&mut self) -> Result<(), EngineError> {
        loop {
            if self.finished() {
                return Ok(());
            }

            let step = tokio::select! {
                biased;

                Some((stream_id, response)) = self.respond_rx.recv() => {
                    self.dispatched -= 1;
                    self.queue_response(stream_id, response).await
                }
                frame = read_frame(&mut self.conn, self.app.limits.http2.max_frame_size) => {
                    let (header, payload) = frame?;
                    self.handle_frame(header, payload).await
                }
            };

            match step {
                Ok(()) => {}
                Err(EngineError::Stream(stream_id, err)) => {
                    let mut out = Vec::new();
                    frame::rst_stream(&mut out, stream_id, err);
                    self.conn.write_all(&out).await?;
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.close();
                    }
                    self.pending.retain(|p| p.stream_id != stream_id);
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Done when the peer said GOAWAY (or EOF is pending) and nothing is
    /// in flight.
    fn finished(&self) -> bool {
        self.goaway_received
            && self.dispatched == 0
            && self.pending.is_empty()
            && self
                .streams
                .values()
                .all(|s| s.state == StreamState::Closed)
    }

    async fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        // A started header block must finish before anything else.
        if self.assembling.is_some() && header.kind != frame::CONTINUATION {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }

        match header.kind {
            frame::DATA => self.on_data(header, payload).await,
            frame::HEADERS => self.on_headers(header, payload).await,
            frame::CONTINUATION => self.on_continuation(header, payload).await,
            frame::PRIORITY => {
                if header.stream_id == 0 {
                    return Err(EngineError::Conn(Http2Error::ProtocolError));
                }
                if payload.len() != 5 {
                    return Err(EngineError::Stream(
                        header.stream_id,
                        Http2Error::FrameSizeError,
                    ));
                }
                // Parsed for well-formedness only; no prioritization.
                Ok(())
            }
            frame::RST_STREAM => {
                if header.stream_id == 0 || payload.len() != 4 {
                    return Err(EngineError::Conn(Http2Error::ProtocolError));
                }
                if let Some(stream) = self.streams.get_mut(&header.stream_id) {
                    stream.close();
                }
                self.pending.retain(|p| p.stream_id != header.stream_id);
                Ok(())
            }
            frame::SETTINGS => self.on_settings(header, payload).await,
            frame::PUSH_PROMISE => Err(EngineError::Conn(Http2Error::ProtocolError)),
            frame::PING => {
                if header.stream_id != 0 || payload.len() != 8 {
                    return Err(EngineError::Conn(Http2Error::ProtocolError));
                }
                if !header.has(frame::FLAG_ACK) {
                    let mut out = Vec::new();
                    frame::ping_reply(&mut out, payload[..8].try_into().unwrap());
                    self.conn.write_all(&out).await?;
                }
                Ok(())
            }
            frame::GOAWAY => {
                self.goaway_received = true;
                Ok(())
            }
            frame::WINDOW_UPDATE => self.on_window_update(header, payload).await,
            // Unknown frame types are ignored, RFC 7540 §4.1.
            _ => Ok(()),
        }
    }

    async fn on_data(&mut self, header: FrameHeader, payload: Vec<u8>) -> Result<(), EngineError> {
        if header.stream_id == 0 {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }

        // Flow control counts the whole payload, padding included.
        self.windows
            .recv_data(payload.len())
            .map_err(EngineError::Conn)?;

        let stream_id = header.stream_id;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return match stream_id <= self.last_stream_id {
                true => Err(EngineError::Stream(stream_id, Http2Error::StreamClosed)),
                // DATA on an idle stream is a connection error.
                false => Err(EngineError::Conn(Http2Error::ProtocolError)),
            };
        };

        if stream.state != StreamState::Open {
            return Err(EngineError::Stream(stream_id, Http2Error::StreamClosed));
        }

        stream
            .recv_data(payload.len())
            .map_err(|e| EngineError::Stream(stream_id, e))?;

        let body = frame::strip_padding(&header, &payload).map_err(EngineError::Conn)?;

        if stream.data.len() + body.len() > self.app.limits.req.body_size {
            stream.over_limit = true;
            stream.data.clear();
        } else if !stream.over_limit {
            stream.data.extend_from_slice(body);
        }

        // The body is buffered as consumed: replenish the stream window
        // immediately, the connection window at the half-way threshold.
        let mut out = Vec::new();
        if !payload.is_empty() {
            frame::window_update(&mut out, stream_id, payload.len() as u32);
        }
        let conn_increment = self.windows.release(payload.len());
        if conn_increment > 0 {
            frame::window_update(&mut out, 0, conn_increment);
        }
        if !out.is_empty() {
            self.conn.write_all(&out).await?;
        }

        if header.has(frame::FLAG_END_STREAM) {
            self.complete_request(stream_id)?;
        }
        Ok(())
    }

    async fn on_headers(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        let stream_id = header.stream_id;
        if stream_id == 0 || stream_id % 2 == 0 {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }

        let fragment = frame::strip_padding(&header, &payload)
            .map_err(EngineError::Conn)?
            .to_vec();
        let end_stream = header.has(frame::FLAG_END_STREAM);

        if header.has(frame::FLAG_END_HEADERS) {
            self.header_block_done(stream_id, end_stream, &fragment).await
        } else {
            self.assembling = Some((stream_id, end_stream, fragment));
            Ok(())
        }
    }

    async fn on_continuation(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        let Some((stream_id, end_stream, mut fragment)) = self.assembling.take() else {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        };
        if header.stream_id != stream_id {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }

        fragment.extend_from_slice(&payload);
        if fragment.len() > self.app.limits.req.header_block_size * 4 {
            // A peer pumping unbounded CONTINUATIONs is attacking.
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }

        if header.has(frame::FLAG_END_HEADERS) {
            self.header_block_done(stream_id, end_stream, &fragment).await
        } else {
            self.assembling = Some((stream_id, end_stream, fragment));
            Ok(())
        }
    }

    async fn header_block_done(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        block: &[u8],
    ) -> Result<(), EngineError> {
        let headers = self.decoder.decode(block).map_err(EngineError::Conn)?;
        validate_header_block(&headers).map_err(EngineError::Conn)?;

        if let Some(state) = self.streams.get(&stream_id).map(|s| s.state) {
            return match state {
                // Trailers must end the stream.
                StreamState::Open if end_stream => {
                    self.complete_request(stream_id)?;
                    Ok(())
                }
                StreamState::Open => Err(EngineError::Conn(Http2Error::ProtocolError)),
                _ => Err(EngineError::Stream(stream_id, Http2Error::StreamClosed)),
            };
        }

        if stream_id <= self.last_stream_id {
            // Stream identifiers must increase monotonically.
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }
        self.last_stream_id = stream_id;

        let active = self
            .streams
            .values()
            .filter(|s| s.state != StreamState::Closed)
            .count();
        if self.goaway_received
            || active >= self.app.limits.http2.max_concurrent_streams as usize
        {
            let mut out = Vec::new();
            frame::rst_stream_code(&mut out, stream_id, frame::REFUSED_STREAM);
            self.conn.write_all(&out).await?;
            return Ok(());
        }

        let mut stream = Stream::new(
            stream_id,
            self.peer_settings.initial_window_size,
            self.app.limits.http2.initial_window_size,
        );
        stream.headers = headers;
        self.streams.insert(stream_id, stream);

        if end_stream {
            self.complete_request(stream_id)?;
        }
        Ok(())
    }

    async fn on_settings(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        if header.stream_id != 0 {
            return Err(EngineError::Conn(Http2Error::ProtocolError));
        }
        if header.has(frame::FLAG_ACK) {
            if !payload.is_empty() {
                return Err(EngineError::Conn(Http2Error::FrameSizeError));
            }
            return Ok(());
        }

        let old_initial = self.peer_settings.initial_window_size as i64;
        self.peer_settings
            .apply(&payload)
            .map_err(EngineError::Conn)?;

        // A changed INITIAL_WINDOW_SIZE retroactively adjusts every open
        // stream's send window, RFC 7540 §6.9.2.
        let delta = self.peer_settings.initial_window_size as i64 - old_initial;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window += delta;
            }
        }

        let mut out = Vec::new();
        frame::settings_ack(&mut out);
        self.conn.write_all(&out).await?;

        self.flush_sends().await
    }

    async fn on_window_update(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        if payload.len() != 4 {
            return Err(EngineError::Conn(Http2Error::FrameSizeError));
        }
        let increment =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;

        if header.stream_id == 0 {
            self.windows.add_send(increment).map_err(EngineError::Conn)?;
        } else if let Some(stream) = self.streams.get_mut(&header.stream_id) {
            stream
                .add_send_window(increment)
                .map_err(|e| EngineError::Stream(header.stream_id, e))?;
        }

        self.flush_sends().await
    }

    /// The request on `stream_id` is complete: hand it to the pipeline.
    fn complete_request(&mut self, stream_id: u32) -> Result<(), EngineError> {
        let stream = self.streams.get_mut(&stream_id).expect("stream exists");
        stream.remote_done();

        if stream.over_limit {
            let response = Response::new(StatusCode::PayloadTooLarge)
                .with_header("content-type", "text/plain")
                .with_body("payload too large");
            self.dispatched += 1;
            let tx = self.respond_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send((stream_id, response)).await;
            });
            return Ok(());
        }

        tracing::debug!(stream = stream.id, "request complete");
        let headers = std::mem::take(&mut stream.headers);
        let data = std::mem::take(&mut stream.data);
        let peer = self.conn.remote_addr();

        let request = match build_request(headers, data, peer) {
            Ok(request) => request,
            Err(err) => return Err(EngineError::Stream(stream_id, err)),
        };

        self.dispatch(stream_id, request);
        Ok(())
    }

    fn dispatch(&mut self, stream_id: u32, request: Request) {
        self.dispatched += 1;
        let app = self.app.clone();
        let tx = self.respond_tx.clone();
        let is_head = request.method() == Method::Head;

        tokio::spawn(async move {
            let mut response = app.respond(request).await;
            if is_head {
                if let Body::Bytes(bytes) = response.body() {
                    let length = bytes.len().to_string();
                    response.headers_mut().set("content-length", length);
                }
                response = response.with_body(Vec::new());
            }
            let _ = tx.send((stream_id, response)).await;
        });
    }

    async fn queue_response(
        &mut self,
        stream_id: u32,
        mut response: Response,
    ) -> Result<(), EngineError> {
        let alive = self
            .streams
            .get(&stream_id)
            .map(|s| s.state != StreamState::Closed)
            .unwrap_or(false);
        if !alive {
            return Ok(());
        }

        let mut fields = vec![(":status".to_string(), response.status().as_u16().to_string())];
        for (name, value) in response.headers().iter() {
            // Connection-specific headers never cross into HTTP/2.
            if name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("keep-alive")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            fields.push((name.to_string(), value.to_string()));
        }

        let mut block = Vec::new();
        Encoder::encode(&fields, &mut block);

        let body = collect_body(response.take_body()).await;
        let end_stream_on_headers = body.is_empty();

        let mut out = Vec::new();
        let max_frame = self.peer_settings.max_frame_size as usize;

        // HEADERS, with CONTINUATION frames when the block overflows one
        // frame.
        let mut chunks = block.chunks(max_frame.max(1)).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let mut flags = 0;
            if last {
                flags |= frame::FLAG_END_HEADERS;
            }
            if first && end_stream_on_headers {
                flags |= frame::FLAG_END_STREAM;
            }
            let kind = if first { frame::HEADERS } else { frame::CONTINUATION };
            frame::write_header(&mut out, chunk.len(), kind, flags, stream_id);
            out.extend_from_slice(chunk);
            first = false;
        }
        self.conn.write_all(&out).await?;

        if end_stream_on_headers {
            self.finish_stream(stream_id);
            return Ok(());
        }

        self.pending.push(PendingSend {
            stream_id,
            data: body,
            sent: 0,
        });
        self.flush_sends().await
    }

    /// Writes as much pending DATA as the flow-control windows allow.
    /// Never sends beyond the minimum of the connection and stream
    /// windows; exhausted entries stay queued for the next
    /// WINDOW_UPDATE.
    async fn flush_sends(&mut self) -> Result<(), EngineError> {
        let max_frame = self.peer_settings.max_frame_size as usize;
        let mut out = Vec::new();
        let mut done: Vec<u32> = Vec::new();

        loop {
            let mut progressed = false;

            for entry in self.pending.iter_mut() {
                let Some(stream) = self.streams.get_mut(&entry.stream_id) else {
                    continue;
                };

                let remaining = entry.data.len() - entry.sent;
                if remaining == 0 {
                    continue;
                }

                let allowed = stream
                    .sendable(self.windows.send)
                    .min(max_frame)
                    .min(remaining);
                if allowed == 0 {
                    continue;
                }

                let chunk = &entry.data[entry.sent..entry.sent + allowed];
                let is_final = entry.sent + allowed == entry.data.len();
                let flags = if is_final { frame::FLAG_END_STREAM } else { 0 };

                frame::write_header(&mut out, chunk.len(), frame::DATA, flags, entry.stream_id);
                out.extend_from_slice(chunk);

                stream.sent(allowed);
                self.windows.sent(allowed);
                entry.sent += allowed;
                progressed = true;

                if is_final {
                    done.push(entry.stream_id);
                }
            }

            if !progressed {
                break;
            }
        }

        if !out.is_empty() {
            self.conn.write_all(&out).await?;
        }

        for stream_id in done {
            self.pending.retain(|p| p.stream_id != stream_id);
            self.finish_stream(stream_id);
        }
        Ok(())
    }

    fn finish_stream(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.close();
        }
    }
}

/// Drop-safe frame read: peeks the buffered bytes until a whole frame is
/// present, then consumes it. Safe to race in a `select!`.
async fn read_frame(
    conn: &mut Connection,
    max_frame_size: u32,
) -> Result<(FrameHeader, Vec<u8>), EngineError> {
    loop {
        let buffered = conn.buffered();
        if buffered.len() >= frame::FRAME_HEADER_LEN {
            let header = FrameHeader::parse(buffered[..frame::FRAME_HEADER_LEN].try_into().unwrap());
            if header.length > max_frame_size {
                return Err(EngineError::Conn(Http2Error::FrameSizeError));
            }

            let total = frame::FRAME_HEADER_LEN + header.length as usize;
            if buffered.len() >= total {
                let payload = buffered[frame::FRAME_HEADER_LEN..total].to_vec();
                conn.consume(total);
                return Ok((header, payload));
            }
        }

        if conn.fill_more().await? == 0 {
            return Err(EngineError::Io(IoError::new(IoErrorKind::EndOfStream)));
        }
    }
}

/// Pseudo-headers must precede regular fields, appear at most once each,
/// and connection-specific fields are forbidden.
fn validate_header_block(headers: &[(String, String)]) -> Result<(), Http2Error> {
    let mut seen_regular = false;
    let mut seen = [false; 4];

    for (name, _) in headers {
        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular {
                return Err(Http2Error::ProtocolError);
            }
            let slot = match pseudo {
                "method" => 0,
                "path" => 1,
                "scheme" => 2,
                "authority" => 3,
                _ => return Err(Http2Error::ProtocolError),
            };
            if seen[slot] {
                return Err(Http2Error::ProtocolError);
            }
            seen[slot] = true;
        } else {
            seen_regular = true;
            if name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("transfer-encoding")
                || name.eq_ignore_ascii_case("keep-alive")
            {
                return Err(Http2Error::ProtocolError);
            }
        }
    }

    Ok(())
}

/// Builds a [`Request`] from a decoded header list plus body.
fn build_request(
    headers: Vec<(String, String)>,
    data: Vec<u8>,
    peer: std::net::SocketAddr,
) -> Result<Request, Http2Error> {
    let mut request = Request::new();
    request.version = Version::H2;
    request.body = data;
    request.peer_addr = Some(peer);

    let mut method = None;
    let mut target = None;

    for (name, value) in headers {
        match name.as_str() {
            ":method" => {
                method = Some(
                    Method::from_token(value.as_bytes()).unwrap_or(Method::Unknown),
                );
            }
            ":path" => target = Some(value),
            ":scheme" => {}
            ":authority" => {
                if request.headers.get("host").is_none() {
                    request.headers.append("host", value);
                }
            }
            _ => request.headers.append(name, value),
        }
    }

    request.method = method.ok_or(Http2Error::ProtocolError)?;
    let target = target.ok_or(Http2Error::ProtocolError)?;
    if target.is_empty() {
        return Err(Http2Error::ProtocolError);
    }

    let (raw_path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target.as_str(), ""),
    };
    request.path = decode_str(raw_path.as_bytes()).ok_or(Http2Error::ProtocolError)?;
    request.raw_query = raw_query.to_string();
    Query::parse_into(&mut request.query, raw_query.as_bytes());

    Ok(request)
}

/// Flattens a response body into one buffer for DATA framing.
async fn collect_body(body: Body) -> Vec<u8> {
    match body {
        Body::Bytes(bytes) => bytes,
        Body::Stream(chunks) => {
            let mut out = Vec::new();
            for chunk in chunks {
                out.extend_from_slice(&chunk);
            }
            out
        }
        Body::File {
            path,
            offset,
            length,
        } => {
            let mut out = Vec::with_capacity(length as usize);
            let opened = tokio::fs::File::open(&path).await;
            match opened {
                Ok(mut file) => {
                    use tokio::io::AsyncSeekExt;
                    if file.seek(std::io::SeekFrom::Start(offset)).await.is_ok() {
                        let _ = (&mut file).take(length).read_to_end(&mut out).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(?path, %err, "file body unavailable");
                }
            }
            out
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_settings_decoding() {
        // A 6-byte SETTINGS payload (INITIAL_WINDOW_SIZE = 1<<16).
        let payload = [0u8, 4, 0, 1, 0, 0];
        let encoded = URL_SAFE_NO_PAD.encode(payload);

        assert_eq!(decode_upgrade_settings(&encoded).unwrap(), payload);
        assert!(decode_upgrade_settings("!!!not-base64!!!").is_none());
        // Truncated payloads are rejected before the engine starts.
        assert!(decode_upgrade_settings(&URL_SAFE_NO_PAD.encode([1, 2, 3])).is_none());
    }

    #[test]
    fn header_block_validation() {
        let ok = |list: &[(&str, &str)]| {
            validate_header_block(
                &list
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect::<Vec<_>>(),
            )
        };

        assert!(ok(&[(":method", "GET"), (":path", "/"), ("accept", "*/*")]).is_ok());

        // Pseudo-header after a regular field.
        assert_eq!(
            ok(&[("accept", "*/*"), (":method", "GET")]),
            Err(Http2Error::ProtocolError)
        );
        // Duplicate pseudo-header.
        assert_eq!(
            ok(&[(":method", "GET"), (":method", "POST")]),
            Err(Http2Error::ProtocolError)
        );
        // Unknown pseudo-header.
        assert_eq!(ok(&[(":version", "2")]), Err(Http2Error::ProtocolError));
        // Connection-specific field.
        assert_eq!(
            ok(&[(":method", "GET"), ("connection", "close")]),
            Err(Http2Error::ProtocolError)
        );
    }

    #[test]
    fn request_building() {
        let headers = vec![
            (":method".to_string(), "POST".to_string()),
            (":scheme".to_string(), "http".to_string()),
            (":path".to_string(), "/a%20b?x=1&y".to_string()),
            (":authority".to_string(), "example.com".to_string()),
            ("content-type".to_string(), "text/plain".to_string()),
        ];
        let peer = "127.0.0.1:4321".parse().unwrap();

        let request = build_request(headers, b"body".to_vec(), peer).unwrap();
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.path(), "/a b");
        assert_eq!(request.query("x"), Some("1"));
        assert_eq!(request.query("y"), Some(""));
        assert_eq!(request.header("host"), Some("example.com"));
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.body(), b"body");
        assert_eq!(request.version(), Version::H2);
    }

    #[test]
    fn request_requires_method_and_path() {
        let peer = "127.0.0.1:1".parse().unwrap();

        let no_path = vec![(":method".to_string(), "GET".to_string())];
        assert_eq!(
            build_request(no_path, Vec::new(), peer).unwrap_err(),
            Http2Error::ProtocolError
        );

        let no_method = vec![(":path".to_string(), "/".to_string())];
        assert_eq!(
            build_request(no_method, Vec::new(), peer).unwrap_err(),
            Http2Error::ProtocolError
        );
    }

    #[test]
    fn nonstandard_method_becomes_unknown() {
        let headers = vec![
            (":method".to_string(), "BREW".to_string()),
            (":path".to_string(), "/pot".to_string()),
        ];
        let peer = "127.0.0.1:1".parse().unwrap();
        let request = build_request(headers, Vec::new(), peer).unwrap();
        assert_eq!(request.method(), Method::Unknown);
    }
}
