//! Reference HTTP/1.1 transport on hyper.
//!
//! Each stream gets its own TCP connection and task on the engine runtime.
//! Request body frames are streamed through a channel so `send_data` never
//! blocks the engine thread.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::http::HeaderList;
use crate::stream::StreamId;
use crate::transport::{Protocol, Route, Transport, TransportEvents};
use bytes::Bytes;
use futures::channel::mpsc;
use http::header::{HeaderValue, HOST};
use http::{Method, Request, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type RequestBody = UnsyncBoxBody<Bytes, Infallible>;
type BodySender = mpsc::UnboundedSender<Result<Frame<Bytes>, Infallible>>;

struct ActiveStream {
    body: Option<BodySender>,
    task: JoinHandle<()>,
}

/// One connection per stream, HTTP/1.1 only, cleartext only.
pub struct Http1Transport {
    events: TransportEvents,
    streams: HashMap<StreamId, ActiveStream>,
    next_connection_id: u64,
}

impl Http1Transport {
    pub fn new(events: TransportEvents) -> Self {
        Self {
            events,
            streams: HashMap::new(),
            next_connection_id: 1,
        }
    }
}

impl Transport for Http1Transport {
    fn start_stream(&mut self, id: StreamId, route: &Route, headers: &HeaderList, end_stream: bool) {
        self.streams.retain(|_, s| !s.task.is_finished());

        if route.scheme != "http" {
            self.events.error(id, NetError::DisallowedUrlScheme);
            return;
        }

        let (body_tx, body) = if end_stream {
            (None, Empty::<Bytes>::new().boxed_unsync())
        } else {
            let (tx, rx) = mpsc::unbounded();
            (Some(tx), StreamBody::new(rx).boxed_unsync())
        };
        let request = match build_request(headers, body) {
            Ok(request) => request,
            Err(e) => {
                self.events.error(id, e);
                return;
            }
        };

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        let events = self.events.clone();
        let target = Target::from_route(route);
        let task = tokio::spawn(async move {
            if let Err(e) = exchange(id, target, connection_id, request, &events).await {
                debug!(stream_id = %id, error = %e, "http1 exchange failed");
                events.error(id, e);
            }
        });
        self.streams.insert(id, ActiveStream { body: body_tx, task });
    }

    fn send_data(&mut self, id: StreamId, data: Bytes, end_stream: bool) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if let Some(tx) = &stream.body {
            if !data.is_empty() && tx.unbounded_send(Ok(Frame::data(data))).is_err() {
                trace!(stream_id = %id, "request body receiver gone");
            }
        }
        if end_stream {
            stream.body = None;
        }
    }

    fn send_trailers(&mut self, id: StreamId, trailers: &HeaderList) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if let Some(tx) = stream.body.take() {
            match trailers.to_header_map() {
                Ok(map) => {
                    let _ = tx.unbounded_send(Ok(Frame::trailers(map)));
                }
                Err(e) => debug!(stream_id = %id, error = %e, "dropping invalid request trailers"),
            }
        }
    }

    fn reset_stream(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.remove(&id) {
            stream.task.abort();
            trace!(stream_id = %id, "http1 stream reset");
        }
    }

    fn shutdown(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.task.abort();
        }
    }
}

enum Target {
    Endpoint(std::net::SocketAddr, String),
    Host(String, u16),
}

impl Target {
    fn from_route(route: &Route) -> Self {
        match route.cached_endpoint {
            Some(addr) => Target::Endpoint(addr, route.host.clone()),
            None => Target::Host(route.host.clone(), route.port),
        }
    }

    async fn connect(&self) -> Result<TcpStream, NetError> {
        match self {
            Target::Endpoint(addr, host) => TcpStream::connect(addr)
                .await
                .connection_context(host, addr.port()),
            Target::Host(host, port) => {
                let addrs = lookup_host((host.as_str(), *port)).await.dns_context(host)?;
                let mut last = NetError::dns_failed(
                    host,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses"),
                );
                for addr in addrs {
                    match TcpStream::connect(addr).await.connection_context(host, *port) {
                        Ok(tcp) => return Ok(tcp),
                        Err(e) => {
                            trace!(%addr, error = %e, "http1 connect attempt failed");
                            last = e;
                        }
                    }
                }
                Err(last)
            }
        }
    }
}

// Aborts the connection driver when the exchange task goes away.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn exchange(
    id: StreamId,
    target: Target,
    connection_id: u64,
    request: Request<RequestBody>,
    events: &TransportEvents,
) -> Result<(), NetError> {
    let tcp = target.connect().await?;
    let _ = tcp.set_nodelay(true);
    let (mut sender, conn) = http1::handshake(TokioIo::new(tcp))
        .await
        .map_err(map_hyper_error)?;
    let _driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(connection_id, error = %e, "http1 connection ended");
        }
    }));
    events.connected(id, Protocol::Http1, connection_id);

    let response = sender
        .send_request(request)
        .await
        .map_err(map_hyper_error)?;
    let (parts, mut body) = response.into_parts();
    let end_stream = body.is_end_stream();
    events.headers(
        id,
        HeaderList::from_response_parts(parts.status.as_u16(), &parts.headers),
        end_stream,
    );
    if end_stream {
        return Ok(());
    }

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(map_hyper_error)?;
        match frame.into_data() {
            Ok(data) => {
                if !data.is_empty() {
                    events.data(id, data, false);
                }
            }
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    events.trailers(id, HeaderList::from_header_map(&trailers));
                    return Ok(());
                }
            }
        }
    }
    events.data(id, Bytes::new(), true);
    Ok(())
}

fn build_request(headers: &HeaderList, body: RequestBody) -> Result<Request<RequestBody>, NetError> {
    let method = headers.get(":method").unwrap_or("GET");
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| NetError::InvalidHeader)?;
    let uri: Uri = headers
        .get(":path")
        .unwrap_or("/")
        .parse()
        .map_err(|_| NetError::InvalidUrl)?;

    let mut map = headers.to_header_map()?;
    if !map.contains_key(HOST) {
        if let Some(authority) = headers.get(":authority") {
            let value = HeaderValue::from_str(authority).map_err(|_| NetError::InvalidHeader)?;
            map.insert(HOST, value);
        }
    }

    let mut request = Request::new(body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.headers_mut() = map;
    Ok(request)
}

fn map_hyper_error(e: hyper::Error) -> NetError {
    if e.is_parse() || e.is_parse_status() {
        NetError::InvalidResponse
    } else if e.is_incomplete_message() {
        NetError::EmptyResponse
    } else if e.is_timeout() {
        NetError::TimedOut
    } else if e.is_canceled() {
        NetError::ConnectionAborted
    } else if e.is_closed() {
        NetError::ConnectionClosed
    } else {
        NetError::ConnectionFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_sets_host() {
        let headers = HeaderList::request("POST", "http", "example.com:8080", "/upload?x=1")
            .with("X-Trace", "abc")
            .unwrap();
        let request = build_request(&headers, Empty::<Bytes>::new().boxed_unsync()).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "/upload?x=1");
        assert_eq!(request.headers().get(HOST).unwrap(), "example.com:8080");
        assert_eq!(request.headers().get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_explicit_host_header_kept() {
        let headers = HeaderList::request("GET", "http", "example.com", "/")
            .with("Host", "override.test")
            .unwrap();
        let request = build_request(&headers, Empty::<Bytes>::new().boxed_unsync()).unwrap();
        assert_eq!(request.headers().get_all(HOST).iter().count(), 1);
        assert_eq!(request.headers().get(HOST).unwrap(), "override.test");
    }
}
