pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

/// `Host` header for a URL; the port is omitted when it is the scheme default.
pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).unwrap_or_else(|e| panic!("{url}: {e}"));
        host_header_value(&parsed)
    }

    #[test]
    fn host_header_omits_default_ports() {
        assert_eq!(host("http://catalog.test/products").as_deref(), Some("catalog.test"));
        assert_eq!(host("http://catalog.test:80/").as_deref(), Some("catalog.test"));
        assert_eq!(host("https://catalog.test:443/").as_deref(), Some("catalog.test"));
        assert_eq!(
            host("http://127.0.0.1:8080/").as_deref(),
            Some("127.0.0.1:8080")
        );
    }

    #[test]
    fn header_lookup_ignores_case() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        assert!(has_header(&headers, "content-type"));
        assert!(!has_header(&headers, "host"));
    }
}
