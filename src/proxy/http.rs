//! Plain HTTP forwarding to a single upstream.

use axum::body::Body;
use axum::http::uri::Uri;
use axum::http::{header, HeaderMap, HeaderValue, Request, Version};
use url::Url;

use crate::http::context::Context;
use crate::http::request::{peer_addr, X_FORWARDED_FOR};
use crate::load_balancer::ProxyTarget;
use crate::proxy::{HttpClient, ModifyResponse, ProxyError};

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::HeaderName::from_static("keep-alive"),
    header::HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Strip hop-by-hop headers, including any named in `Connection`.
pub(crate) fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    for name in listed {
        headers.remove(name.as_str());
    }
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

fn join_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Address `incoming` to `base`: base path joined with the request path,
/// base query first.
pub(crate) fn upstream_uri(base: &Url, incoming: &Uri) -> Result<Uri, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidTarget {
        target: base.to_string(),
        reason: reason.to_string(),
    };
    let host = base.host_str().ok_or_else(|| invalid("missing host"))?;
    let scheme = match base.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        _ => return Err(invalid("unsupported scheme")),
    };
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let path = join_slash(base.path(), incoming.path());
    let query = match (base.query().filter(|q| !q.is_empty()), incoming.query()) {
        (Some(a), Some(b)) => format!("?{a}&{b}"),
        (Some(q), None) | (None, Some(q)) => format!("?{q}"),
        (None, None) => String::new(),
    };

    format!("{scheme}://{authority}{path}{query}")
        .parse()
        .map_err(|_| invalid("request does not form a valid upstream URI"))
}

fn append_forwarded_for(headers: &mut HeaderMap, client: &str) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client}"),
        _ => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Forward the Context's request to `target` and copy the upstream response
/// into the writer.
pub(crate) async fn forward(
    ctx: &mut Context,
    target: &ProxyTarget,
    client: &HttpClient,
    modify_response: Option<&ModifyResponse>,
) -> Result<(), ProxyError> {
    let peer = peer_addr(ctx.request());
    let (mut parts, body) = ctx.take_request().into_parts();

    parts.uri = upstream_uri(&target.url, &parts.uri)?;
    parts.version = Version::HTTP_11;
    remove_hop_headers(&mut parts.headers);
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, &peer.ip().to_string());
    }
    let request = Request::from_parts(parts, body);

    let cancellation = ctx.cancellation().clone();
    let response = tokio::select! {
        result = client.request(request) => result,
        _ = cancellation.cancelled() => {
            return Err(ProxyError::Canceled { target: target.name.clone() });
        }
    };
    let response = match response {
        Ok(response) => response,
        Err(err) if is_canceled(&err) => {
            return Err(ProxyError::Canceled { target: target.name.clone() });
        }
        Err(err) => {
            return Err(ProxyError::Unreachable {
                target: target.to_string(),
                source: err.into(),
            });
        }
    };

    let mut response = response.map(Body::new);
    remove_hop_headers(response.headers_mut());
    if let Some(hook) = modify_response {
        response = hook(response).await.map_err(|source| ProxyError::ModifyResponse {
            target: target.to_string(),
            source,
        })?;
    }

    tracing::debug!(
        parent: ctx.span(),
        target = %target.name,
        status = response.status().as_u16(),
        "Upstream responded"
    );
    ctx.writer_mut().write_response(response);
    Ok(())
}

/// True when the client error came from a canceled request.
fn is_canceled(err: &hyper_util::client::legacy::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_canceled() {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
