//! Request inspection helpers.
//!
//! # Responsibilities
//! - Well-known forwarding header names
//! - Derive the client IP and scheme from headers or connection info
//! - Detect WebSocket upgrade requests
//!
//! # Design Decisions
//! - Forwarding headers win over the socket peer so the proxy chain stays
//!   transparent
//! - TLS listeners tag each request with a `TlsConnection` extension

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderName, Request};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_PROTOCOL: HeaderName = HeaderName::from_static("x-forwarded-protocol");
pub const X_FORWARDED_SSL: HeaderName = HeaderName::from_static("x-forwarded-ssl");
pub const X_URL_SCHEME: HeaderName = HeaderName::from_static("x-url-scheme");

/// Request extension marking a connection accepted over TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsConnection;

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: first X-Forwarded-For entry, then X-Real-IP, then peer.
pub fn client_ip<B>(request: &Request<B>) -> String {
    let headers = request.headers();
    if let Some(first) = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header_str(headers, &X_REAL_IP) {
        return real.to_string();
    }
    peer_addr(request)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

/// Socket peer address, when the listener recorded one.
pub fn peer_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Scheme the client used, as far as this hop can tell.
pub fn scheme<B>(request: &Request<B>) -> String {
    if request.extensions().get::<TlsConnection>().is_some() {
        return "https".to_string();
    }
    let headers = request.headers();
    if let Some(proto) = header_str(headers, &X_FORWARDED_PROTO) {
        return proto.to_string();
    }
    if let Some(proto) = header_str(headers, &X_FORWARDED_PROTOCOL) {
        return proto.to_string();
    }
    if header_str(headers, &X_FORWARDED_SSL) == Some("on") {
        return "https".to_string();
    }
    if let Some(proto) = header_str(headers, &X_URL_SCHEME) {
        return proto.to_string();
    }
    "http".to_string()
}

/// True for `Upgrade: websocket` requests.
pub fn is_websocket<B>(request: &Request<B>) -> bool {
    header_str(request.headers(), &header::UPGRADE)
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}
