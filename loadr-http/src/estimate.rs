use loadr_core::HttpRequest;

use super::util::{has_header, host_header_value};
use super::{Error, Result};

/// Bytes an HTTP/1.1 request puts on the wire: request line, headers, blank line and body.
///
/// `Host` and `Content-Length` are counted even when the caller did not set them, because the
/// client always sends them.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    let parsed = parse_url(&req.url)?;
    Ok(request_bytes(
        &req.method,
        &parsed,
        &req.headers,
        req.body.len() as u64,
    ))
}

pub(super) fn parse_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(Error::UnsupportedScheme(raw.to_string())),
    }
}

pub(super) fn request_bytes(
    method: &http::Method,
    url: &url::Url,
    headers: &[(String, String)],
    body_len: u64,
) -> u64 {
    let path_len = url.path().len() + url.query().map_or(0, |q| q.len() + 1);

    // "METHOD SP path SP HTTP/1.1 CRLF"
    let mut bytes = (method.as_str().len() + 1 + path_len + 1 + "HTTP/1.1".len() + 2) as u64;

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }
    if !has_header(headers, "host")
        && let Some(host) = host_header_value(url)
    {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }
    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", v.as_bytes()));
    }

    bytes.saturating_add(2).saturating_add(body_len)
}

pub(super) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version = match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2",
        http::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };

    // "HTTP/1.1 SP 200 CRLF"; the reason phrase is not counted.
    let mut bytes = (version.len() + 1 + status.as_str().len() + 2) as u64;
    for (name, value) in headers {
        bytes = bytes.saturating_add(header_bytes(name.as_str().as_bytes(), value.as_bytes()));
    }
    bytes.saturating_add(2)
}

// "name: value\r\n"
fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    (name.len() + 2 + value.len() + 2) as u64
}
