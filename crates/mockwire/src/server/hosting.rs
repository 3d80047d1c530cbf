//! HTTP/1.1 listener in front of a [`MockServer`].
//!
//! Converts hyper requests into [`RequestMessage`] values, hands them to the
//! engine and renders the [`ResponseMessage`] back, applying fault
//! directives on the way out.

use super::MockServer;
use crate::message::{BodyData, FaultType, RequestMessage, ResponseMessage};
use crate::proxy::to_header_map;
use anyhow::Context;
use futures::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use rand::{Rng, RngCore};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type ResponseBody = BoxBody<Bytes, io::Error>;

/// Running listener. Dropping the handle leaves the listener running; call
/// [`ServerHandle::shutdown`] to stop accepting connections.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL of the listener, e.g. `http://127.0.0.1:9091`.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Listener task ended abnormally: {}", e);
        }
    }
}

/// Bind `host:port` and serve `server` until shut down. Port 0 picks a
/// free port; see [`ServerHandle::local_addr`].
pub async fn serve(server: Arc<MockServer>, host: &str, port: u16) -> Result<ServerHandle, anyhow::Error> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    let local_addr = listener.local_addr()?;
    info!("Mock server listening on http://{}", local_addr);

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut shutdown_rx = shutdown_tx.subscribe();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let server = Arc::clone(&server);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let server = Arc::clone(&server);
                                    async move { handle_wire_request(req, server, addr).await }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", local_addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Mock server on {} shutting down", local_addr);
                    break;
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        task,
    })
}

async fn handle_wire_request(
    req: Request<Incoming>,
    server: Arc<MockServer>,
    client_addr: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let request = match to_request_message(req, client_addr).await {
        Ok(request) => request,
        Err(e) => {
            debug!("Failed to read request from {}: {}", client_addr, e);
            return Ok(render(ResponseMessage::error(400, "Failed to read request body")));
        }
    };

    let response = server.handle_request(request).await;
    Ok(render(response))
}

fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

async fn to_request_message(req: Request<Incoming>, client_addr: SocketAddr) -> Result<RequestMessage, hyper::Error> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = match parts.headers.get(hyper::header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) if parts.uri.scheme().is_none() => format!("http://{host}{path_and_query}"),
        _ => parts.uri.to_string(),
    };

    let mut request = RequestMessage::new(parts.method.as_str(), &url)
        .with_client_ip(client_addr.ip().to_string())
        .with_http_version(version_text(parts.version));
    for (name, value) in parts.headers.iter() {
        request = request.with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }

    let bytes = body.collect().await?.to_bytes();
    request.body = BodyData::detect(
        bytes,
        request.headers.first("content-type"),
        request.headers.first("content-encoding"),
    );
    Ok(request)
}

/// Whether a fault with `percentage` fires for this response.
fn fault_applies(percentage: Option<f64>) -> bool {
    match percentage {
        None => true,
        Some(p) if p.is_finite() => rand::thread_rng().gen_bool(p.clamp(0.0, 1.0)),
        Some(_) => false,
    }
}

fn render(response: ResponseMessage) -> Response<ResponseBody> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match response.fault.as_ref().filter(|f| fault_applies(f.percentage)) {
        Some(fault) if fault.kind == FaultType::EmptyResponse => {
            debug!("Applying EMPTY_RESPONSE fault");
            Empty::new().map_err(|never: Infallible| match never {}).boxed()
        }
        Some(_) => {
            debug!("Applying MALFORMED_RESPONSE_CHUNK fault");
            let mut garbage = vec![0u8; 64];
            rand::thread_rng().fill_bytes(&mut garbage);
            let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![
                Ok(Frame::data(Bytes::from(garbage))),
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "malformed response chunk")),
            ];
            let mut malformed = Response::new(StreamBody::new(stream::iter(frames)).boxed());
            *malformed.status_mut() = StatusCode::OK;
            return malformed;
        }
        None if response.trailing_headers.is_empty() => Full::new(response.body.to_bytes())
            .map_err(|never: Infallible| match never {})
            .boxed(),
        None => {
            let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![
                Ok(Frame::data(response.body.to_bytes())),
                Ok(Frame::trailers(to_header_map(&response.trailing_headers))),
            ];
            StreamBody::new(stream::iter(frames)).boxed()
        }
    };

    let mut rendered = Response::new(body);
    *rendered.status_mut() = status;
    let headers = rendered.headers_mut();
    *headers = to_header_map(&response.headers);
    if !headers.contains_key(hyper::header::CONTENT_TYPE) {
        if let Some(content_type) = response
            .body
            .content_type
            .as_deref()
            .and_then(|ct| hyper::header::HeaderValue::from_str(ct).ok())
        {
            headers.insert(hyper::header::CONTENT_TYPE, content_type);
        }
    }
    rendered
}
