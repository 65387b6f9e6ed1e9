//! Client identity extraction for rate limiting.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

use crate::config::ClientIdentity;

/// Key used when no identity can be derived at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limiting key for a request under the given policy.
pub fn client_key<B>(policy: ClientIdentity, request: &Request<B>) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match policy {
        ClientIdentity::PeerAddress => peer_key(peer),
        ClientIdentity::ForwardedFor => forwarded_key(request.headers()).unwrap_or_else(|| peer_key(peer)),
    }
}

fn peer_key(peer: Option<SocketAddr>) -> String {
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_key(headers: &HeaderMap) -> Option<String> {
    // First hop in X-Forwarded-For is the client.
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
