use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use loadr_core::{HttpRequest, HttpResponse, Transport, TransportError, TransportFuture};
use tokio::time::Instant;

use super::estimate::{parse_url, request_bytes, response_head_bytes};
use super::util::{has_header, host_header_value};
use super::{Error, Result};

/// Unreachable hosts otherwise wait for the OS connect timeout (tens of seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pooled HTTP/1.1 client over plain TCP or rustls.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Sends `req` and reads the whole body. `duration` covers sending through the last body byte.
    pub async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout;
        let parsed = parse_url(&req.url)?;
        let bytes_sent = request_bytes(&req.method, &parsed, &req.headers, req.body.len() as u64);

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Implicit headers are set explicitly so `bytes_sent` matches what goes on the wire.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let started = Instant::now();
        let exchange = async {
            let res: hyper::Response<Incoming> = self.inner.request(request).await?;
            let (parts, body) = res.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };
        let (parts, body) = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| Error::Timeout(timeout))??,
            None => exchange.await?,
        };
        let duration = started.elapsed();

        let bytes_received = response_head_bytes(parts.version, parts.status, &parts.headers)
            .saturating_add(body.len() as u64);

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: merge_headers(&parts.headers),
            body,
            duration,
            bytes_sent,
            bytes_received,
        })
    }
}

/// Sorted by name; repeated headers joined with ", ".
fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
        merged
            .entry(name.as_str().to_string())
            .and_modify(|cur| {
                if !cur.is_empty() {
                    cur.push_str(", ");
                }
                cur.push_str(&v);
            })
            .or_insert(v);
    }
    merged.into_iter().collect()
}

impl Transport for HttpClient {
    fn request(&self, req: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            self.send(req).await.map_err(|err| {
                tracing::trace!(error = %err, "http transport error");
                TransportError::from(err)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_core::TransportErrorKind;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = std::time::Instant::now();
        let err = Transport::request(&client, req)
            .await
            .err()
            .unwrap_or_else(|| panic!("expected connect failure"));
        let elapsed = started.elapsed();

        assert!(
            matches!(err.kind, TransportErrorKind::Connect | TransportErrorKind::Timeout),
            "{err}"
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn invalid_urls_never_reach_the_network() {
        let client = HttpClient::default();
        let err = Transport::request(&client, HttpRequest::get("ftp://catalog.test/"))
            .await
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        assert_eq!(err.kind, TransportErrorKind::UnsupportedScheme);
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = http::HeaderMap::new();
        headers.append("set-cookie", http::HeaderValue::from_static("a=1"));
        headers.append("set-cookie", http::HeaderValue::from_static("b=2"));
        headers.insert("content-type", http::HeaderValue::from_static("application/json"));
        assert_eq!(
            merge_headers(&headers),
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("set-cookie".to_string(), "a=1, b=2".to_string()),
            ]
        );
    }
}
