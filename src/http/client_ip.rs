//! Client IP resolution for unauthenticated endpoints.

use axum::http::HeaderMap;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolve the client IP for a request.
///
/// Precedence: the first entry of `X-Forwarded-For`, then `X-Real-IP`, then
/// the host part of the connection's remote address. Returns `None` when
/// none of them yields a value.
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<&str>) -> Option<String> {
    if let Some(first) = header_str(headers, X_FORWARDED_FOR)
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first.to_string());
    }

    if let Some(real_ip) = header_str(headers, X_REAL_IP)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(real_ip.to_string());
    }

    remote_addr.and_then(host_from_addr)
}

/// Strip the port from `host:port` or `[ipv6]:port`.
///
/// Addresses without a port are returned unchanged, except that brackets
/// around an IPv6 literal are removed.
pub fn host_from_addr(addr: &str) -> Option<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return None;
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let host = match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
        return (!host.is_empty()).then(|| host.to_string());
    }

    match addr.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon and no port to strip.
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            Some(host.to_string())
        }
        _ => Some(addr.to_string()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
