//! Minimal HTTP/1.1 client behind the health probes.
//!
//! Opens one TCP connection per request and drives a hyper http1
//! handshake over it. The whole exchange (connect, request, body) runs
//! under a single timeout so no call can block indefinitely.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("cutover/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("invalid url {0:?}")]
    InvalidUrl(String),

    #[error("unsupported scheme in {0:?} (probes speak plain http)")]
    UnsupportedScheme(String),

    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("http handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("reading response body failed: {0}")]
    Body(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl HttpError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, HttpError::InvalidUrl(_) | HttpError::UnsupportedScheme(_))
    }
}

/// Status and collected body of a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: Vec<(&'a str, String)>,
    pub body: Option<Bytes>,
}

impl<'a> HttpRequest<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn new(method: Method, url: &'a str) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &'a str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Send a request and collect the full response within `timeout`.
pub async fn send(req: HttpRequest<'_>, timeout: Duration) -> Result<HttpResponse, HttpError> {
    let uri: Uri = req
        .url
        .parse()
        .map_err(|_| HttpError::InvalidUrl(req.url.to_string()))?;

    match uri.scheme_str() {
        Some("http") => {}
        Some(_) => return Err(HttpError::UnsupportedScheme(req.url.to_string())),
        None => return Err(HttpError::InvalidUrl(req.url.to_string())),
    }

    let authority = uri
        .authority()
        .ok_or_else(|| HttpError::InvalidUrl(req.url.to_string()))?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Handshake(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(req.method.clone())
            .uri(&path)
            .header("host", authority.as_str())
            .header("user-agent", USER_AGENT);
        for (name, value) in &req.headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(Full::new(req.body.clone().unwrap_or_default()))
            .map_err(|e| HttpError::Request(e.to_string()))?;

        let resp = sender
            .send_request(request)
            .await
            .map_err(|e| HttpError::Request(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Body(e.to_string()))?
            .to_bytes();

        Ok(HttpResponse { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => {
            if let Err(e) = &result {
                debug!(error = %e, url = %req.url, "http request failed");
            }
            result
        }
        Err(_) => {
            debug!(url = %req.url, ?timeout, "http request timed out");
            Err(HttpError::Timeout(timeout))
        }
    }
}
