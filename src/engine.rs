//! FailoverEngine: per-request upstream selection, request rewriting,
//! response streaming, and failure marking.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::instance::FailoverInstance;
use crate::upstream::Upstream;

pub type EngineBody = BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> EngineBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn empty_body() -> EngineBody {
    full_body(Bytes::new())
}

fn bad_gateway() -> Response<EngineBody> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(full_body("All upstreams failed"))
        .expect("building a static response cannot fail")
}

/// Hop-by-hop headers that must never be forwarded verbatim (RFC 7230 §6.1).
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Drive one inbound request through `instance`'s upstream list in
/// declared order. Always returns `Ok` — failures are materialized as HTTP
/// responses, never propagated as Rust errors.
///
/// The inbound body is a single-consumption stream: it is handed, whole,
/// to the first upstream attempt. A second upstream is only meaningfully
/// retried with a body if the first attempt never started sending it;
/// since hyper's `Incoming` can't be cloned or replayed once moved into a
/// request, later attempts in this loop carry an empty body rather than
/// buffer the original for replay — the same limitation the stdlib
/// transport has.
pub async fn handle_request(
    instance: &FailoverInstance,
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    inbound_is_tls: bool,
) -> Result<Response<EngineBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let inbound_path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let inbound_path = parts.uri.path().to_string();

    let mut outbound_headers = parts.headers.clone();
    strip_hop_headers(&mut outbound_headers);
    apply_forwarded_headers(&mut outbound_headers, peer_addr, inbound_is_tls, &parts.headers);

    let mut body = Some(body.boxed());

    for upstream in instance.upstreams() {
        instance.active_tracker.observe(instance);

        if instance.has_health_check(upstream) && instance.health_state.is_known_unhealthy(upstream) {
            debug!(upstream = %upstream, "engine: skipping unhealthy upstream");
            continue;
        }
        if instance
            .failure_cache
            .is_failed(upstream, instance.fail_duration())
        {
            debug!(upstream = %upstream, "engine: skipping upstream in failure cache");
            continue;
        }

        let mut headers = outbound_headers.clone();
        if let Some(overrides) = instance.header_overrides(upstream) {
            for (name, value) in overrides {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        if let Ok(host_value) = HeaderValue::from_str(&host_header_value(upstream)) {
            headers.insert(HOST, host_value);
        }

        let attempt_body = body.take().unwrap_or_else(empty_body);

        match dispatch(
            instance,
            upstream,
            &parts.method,
            &inbound_path,
            &inbound_path_and_query,
            headers,
            attempt_body,
        )
        .await
        {
            Ok(response) => {
                instance.failure_cache.clear(upstream);
                instance.active_tracker.observe(instance);
                return Ok(response);
            }
            Err(reason) => {
                warn!(upstream = %upstream, reason, "engine: upstream attempt failed");
                instance.failure_cache.mark(upstream);
            }
        }
    }

    instance.active_tracker.observe(instance);
    Ok(bad_gateway())
}

/// One upstream attempt. Returns `Ok` for any response with status < 500;
/// everything else (dial/TLS/timeout error, 5xx) is a failure for this
/// upstream. The response body is streamed straight through — never
/// collected into memory.
async fn dispatch(
    instance: &FailoverInstance,
    upstream: &Upstream,
    method: &http::Method,
    inbound_path: &str,
    inbound_path_and_query: &str,
    headers: http::HeaderMap,
    body: EngineBody,
) -> Result<Response<EngineBody>, &'static str> {
    let query = inbound_path_and_query
        .strip_prefix(inbound_path)
        .unwrap_or("");
    let target = format!(
        "{}{}{}",
        upstream.authority(),
        upstream.compose_path(inbound_path),
        query
    );

    let uri: http::Uri = target.parse().map_err(|_| "malformed upstream url after expansion")?;

    let mut builder = Request::builder().method(method.clone()).uri(uri);
    *builder.headers_mut().expect("request builder headers") = headers;
    let outbound = builder
        .body(body)
        .map_err(|_| "failed to build outbound request")?;

    let client = instance.client_pool.for_scheme(upstream.scheme);
    let response_timeout = instance.response_timeout();

    let response = tokio::time::timeout(response_timeout, client.request(outbound))
        .await
        .map_err(|_| "response-header read timeout")?
        .map_err(|_| "connection/dial or tls handshake error")?;

    if response.status().as_u16() >= 500 {
        return Err("upstream returned 5xx");
    }

    let (parts, incoming) = response.into_parts();
    let mut builder = Response::builder().status(parts.status);
    for (name, value) in &parts.headers {
        builder = builder.header(name, value);
    }
    Ok(builder
        .body(incoming.boxed())
        .expect("copying validated headers cannot fail"))
}

/// The outbound `Host` header value for `upstream`: `host:port` when the
/// upstream has a non-default port, `host` alone otherwise.
fn host_header_value(upstream: &Upstream) -> String {
    match upstream.port {
        Some(port) => format!("{}:{}", upstream.host, port),
        None => upstream.host.clone(),
    }
}

fn strip_hop_headers(headers: &mut http::HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Apply `X-Forwarded-*` headers: `For` set to the parsed client IP (not
/// appended), `Proto` preserved if already present, otherwise derived from
/// the inbound connection, `Host` set to the inbound `Host` header.
fn apply_forwarded_headers(
    headers: &mut http::HeaderMap,
    peer_addr: SocketAddr,
    inbound_is_tls: bool,
    original_headers: &http::HeaderMap,
) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");

    if let Ok(v) = HeaderValue::from_str(&peer_addr.ip().to_string()) {
        headers.insert(XFF.clone(), v);
    }

    let already_forwarded = original_headers
        .get(&XFP)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let proto = already_forwarded.unwrap_or_else(|| {
        if inbound_is_tls {
            "https".to_string()
        } else {
            "http".to_string()
        }
    });
    if let Ok(v) = HeaderValue::from_str(&proto) {
        headers.insert(XFP.clone(), v);
    }

    if let Some(host) = original_headers.get(HOST).cloned() {
        headers.insert(XFH.clone(), host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("value"));
        strip_hop_headers(&mut headers);
        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(headers.contains_key("x-custom"));
    }

    /// An inbound `X-Forwarded-Proto: https` over a plain-text connection
    /// is carried through unchanged.
    #[test]
    fn preserves_existing_forwarded_proto() {
        let mut original = http::HeaderMap::new();
        original.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let mut headers = original.clone();

        apply_forwarded_headers(
            &mut headers,
            "127.0.0.1:12345".parse().unwrap(),
            false,
            &original,
        );

        assert_eq!(
            headers.get("x-forwarded-proto").unwrap().to_str().unwrap(),
            "https"
        );
    }

    #[test]
    fn derives_forwarded_proto_from_connection_when_absent() {
        let original = http::HeaderMap::new();
        let mut headers = original.clone();
        apply_forwarded_headers(&mut headers, "127.0.0.1:1".parse().unwrap(), true, &original);
        assert_eq!(
            headers.get("x-forwarded-proto").unwrap().to_str().unwrap(),
            "https"
        );
    }

    #[test]
    fn host_header_includes_non_default_port() {
        let upstream = Upstream::parse("http://u:9001").unwrap();
        assert_eq!(host_header_value(&upstream), "u:9001");
    }

    #[test]
    fn host_header_omits_absent_port() {
        let upstream = Upstream::parse("https://api.internal").unwrap();
        assert_eq!(host_header_value(&upstream), "api.internal");
    }

    #[test]
    fn forwarded_for_is_set_to_peer_ip_not_appended() {
        let mut original = http::HeaderMap::new();
        original.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let mut headers = original.clone();
        apply_forwarded_headers(
            &mut headers,
            "127.0.0.1:9001".parse().unwrap(),
            false,
            &original,
        );
        assert_eq!(
            headers.get("x-forwarded-for").unwrap().to_str().unwrap(),
            "127.0.0.1"
        );
    }
}
