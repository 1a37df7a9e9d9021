//! The per-connection HTTP/1.1 loop: parse, check upgrades, route
//! through the middleware pipeline, serialize, and keep alive until a
//! limit or the client says otherwise.

use crate::{
    errors::{ConnError, HttpError, IoErrorKind},
    http::parser::{ParseStatus, RequestParser},
    http::request::Request,
    http::response::{Body, Response},
    http::types::{Method, StatusCode, Version},
    http2,
    server::connection::Connection,
    server::server_impl::AppState,
    ws,
};
use std::sync::Arc;
use std::time::Instant;

/// How one connection ended.
enum Exit {
    /// Normal close (keep-alive exhausted, client closed, or error
    /// response already written).
    Done,
    /// Ownership left the loop via a protocol upgrade.
    Upgraded,
}

pub(crate) async fn serve(mut conn: Connection, app: Arc<AppState>) {
    conn.set_cancel_token(app.cancel.token());

    let mut parser = RequestParser::with_buffer(&app.limits.req, app.buffers.checkout());
    let exit = run_loop(&mut conn, &app, &mut parser).await;

    app.buffers.checkin(parser.into_buffer());
    if matches!(exit, Exit::Done) {
        conn.close().await;
    }
}

async fn run_loop(conn: &mut Connection, app: &Arc<AppState>, parser: &mut RequestParser) -> Exit {
    let opened = Instant::now();
    let mut served: usize = 0;

    loop {
        conn.set_timeout(app.limits.conn.keep_alive_timeout);

        let request = match next_request(conn, parser).await {
            Ok(Some(request)) => request,
            Ok(None) => return Exit::Done,
            Err(ConnError::Http(err)) => {
                send_error(conn, app, &err).await;
                return Exit::Done;
            }
            Err(ConnError::Io(err)) => {
                if !err.is_cancelled() && err.kind() != IoErrorKind::Timeout {
                    tracing::debug!(%err, "connection read failed");
                }
                return Exit::Done;
            }
        };
        served += 1;

        // Upgrades are decided after parsing, before routing.
        if ws::handshake::is_upgrade(&request) {
            if let Some(handler) = app.ws_handler(request.path()) {
                return match upgrade_websocket(conn, app, &request, handler).await {
                    Ok(()) => Exit::Upgraded,
                    Err(_) => Exit::Done,
                };
            }
        } else if app.http2_enabled {
            if let Some(settings) = h2c_upgrade_settings(&request) {
                return match upgrade_h2c(conn, app, request, &settings).await {
                    Ok(()) => Exit::Upgraded,
                    Err(_) => Exit::Done,
                };
            }
        }

        let version = request.version();
        let is_head = request.method() == Method::Head;
        let client_keep_alive = keep_alive_requested(&request, version);

        let mut response = app.respond(request).await;

        // The loop owns connection management; handler-set values are
        // discarded.
        response.headers_mut().remove("connection");
        response.headers_mut().remove("keep-alive");

        let keep_alive = client_keep_alive
            && served < app.limits.conn.max_requests_per_connection
            && opened.elapsed() < app.limits.conn.connection_lifetime
            && !app.is_draining()
            // A close-delimited stream body has no other way to signal
            // its end.
            && !(matches!(response.body(), Body::Stream(_)) && version == Version::Http10);

        if keep_alive {
            let remaining = app.limits.conn.max_requests_per_connection - served;
            response
                .headers_mut()
                .append("connection", "keep-alive");
            response.headers_mut().append(
                "keep-alive",
                format!(
                    "timeout={}, max={}",
                    app.limits.conn.keep_alive_timeout.as_secs(),
                    remaining
                ),
            );
        } else {
            response.headers_mut().append("connection", "close");
        }

        conn.set_timeout(app.limits.conn.socket_write_timeout);
        if let Err(err) = write_response(conn, response, version, is_head).await {
            if !err.is_cancelled() {
                tracing::debug!(%err, "response write failed");
            }
            return Exit::Done;
        }

        if !keep_alive {
            return Exit::Done;
        }
    }
}

/// Parses the next request off the wire. `Ok(None)` is a clean close
/// between requests.
async fn next_request(
    conn: &mut Connection,
    parser: &mut RequestParser,
) -> Result<Option<Request>, ConnError> {
    loop {
        match parser.resume().map_err(ConnError::from)? {
            ParseStatus::Complete => {
                return Ok(Some(parser.take_request().map_err(ConnError::from)?))
            }
            ParseStatus::NeedMore => {}
        }

        let data = conn.read().await.map_err(ConnError::from)?;
        if data.is_empty() {
            return match parser.is_idle() {
                true => Ok(None),
                false => Err(HttpError::BadRequest("truncated request".to_string()).into()),
            };
        }

        let consumed = data.len();
        parser.feed(data).map_err(ConnError::from)?;
        conn.consume(consumed);
    }
}

fn keep_alive_requested(request: &Request, version: Version) -> bool {
    if request.headers().contains_token("connection", "close") {
        return false;
    }
    match version {
        Version::Http11 | Version::H2 => true,
        // HTTP/1.0 keeps alive only on explicit request.
        Version::Http10 => request.headers().contains_token("connection", "keep-alive"),
    }
}

/// The h2c upgrade predicate: `Upgrade: h2c`, a `Connection` header
/// naming both `Upgrade` and `HTTP2-Settings`, and a decodable settings
/// payload.
fn h2c_upgrade_settings(request: &Request) -> Option<Vec<u8>> {
    let upgrade = request.header("upgrade")?;
    if !upgrade.trim().eq_ignore_ascii_case("h2c") {
        return None;
    }
    if !request.headers().contains_token("connection", "upgrade")
        || !request
            .headers()
            .contains_token("connection", "http2-settings")
    {
        return None;
    }

    http2::conn::decode_upgrade_settings(request.header("http2-settings")?)
}

async fn upgrade_websocket(
    conn: &mut Connection,
    app: &Arc<AppState>,
    request: &Request,
    handler: Arc<dyn ws::socket::WsHandler>,
) -> Result<(), ()> {
    let accept = ws::handshake::accept_response(request);
    let mut head = Vec::new();
    accept.serialize_head(Version::Http11, &mut head);

    conn.set_timeout(app.limits.conn.socket_write_timeout);
    conn.write_all(&head).await.map_err(|_| ())?;

    tracing::debug!(path = request.path(), "websocket upgrade accepted");

    // Ownership moves to the handler; a long-lived socket gets the
    // connection lifetime as its per-operation ceiling.
    let mut owned = std::mem::replace(conn, Connection::placeholder());
    owned.set_timeout(app.limits.conn.connection_lifetime);
    let socket = ws::socket::WebSocketConnection::new(owned, app.limits.ws.clone());

    let task = tokio::spawn(handler.call(socket));
    if let Err(err) = task.await {
        if err.is_panic() {
            tracing::warn!("websocket handler panicked");
        }
    }
    Ok(())
}

async fn upgrade_h2c(
    conn: &mut Connection,
    app: &Arc<AppState>,
    request: Request,
    settings: &[u8],
) -> Result<(), ()> {
    let switch = Response::new(StatusCode::SwitchingProtocols)
        .with_header("connection", "Upgrade")
        .with_header("upgrade", "h2c");
    let mut head = Vec::new();
    switch.serialize_head(Version::Http11, &mut head);

    conn.set_timeout(app.limits.conn.socket_write_timeout);
    conn.write_all(&head).await.map_err(|_| ())?;

    tracing::debug!("h2c upgrade accepted");

    let owned = std::mem::replace(conn, Connection::placeholder());
    http2::conn::serve_upgraded(owned, app.clone(), request, settings).await;
    Ok(())
}

async fn send_error(conn: &mut Connection, app: &Arc<AppState>, err: &HttpError) {
    tracing::debug!(?err, "request rejected");

    let response = Response::new(err.status())
        .with_header("content-type", "text/plain")
        .with_header("connection", "close")
        .with_body(err.message());

    conn.set_timeout(app.limits.conn.socket_write_timeout);
    let _ = write_response(conn, response, Version::Http11, false).await;
}

/// Serializes and writes one response. HEAD responses carry headers only.
async fn write_response(
    conn: &mut Connection,
    mut response: Response,
    version: Version,
    is_head: bool,
) -> Result<(), crate::errors::IoError> {
    let chunked = response.uses_chunked(version);

    let mut head = Vec::new();
    response.serialize_head(version, &mut head);

    match response.take_body() {
        Body::Bytes(bytes) => {
            if !is_head {
                head.extend_from_slice(&bytes);
            }
            conn.write_all(&head).await
        }
        Body::File {
            path,
            offset,
            length,
        } => {
            conn.write_all(&head).await?;
            if is_head {
                return Ok(());
            }
            conn.transmit_file(&path, offset, length).await
        }
        Body::Stream(chunks) => {
            conn.write_all(&head).await?;
            if is_head {
                return Ok(());
            }

            if chunked {
                let mut out = Vec::new();
                for chunk in chunks {
                    if chunk.is_empty() {
                        continue;
                    }
                    out.clear();
                    Response::write_chunk(&mut out, &chunk);
                    conn.write_all(&out).await?;
                }
                conn.write_all(Response::chunk_terminator()).await
            } else {
                // HTTP/1.0: raw stream, delimited by connection close.
                for chunk in chunks {
                    conn.write_all(&chunk).await?;
                }
                Ok(())
            }
        }
    }
}
