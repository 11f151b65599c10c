//! HTTP transport capability.
//!
//! The protocol code never talks to `reqwest` directly. It builds an
//! [`HttpRequest`], hands it to an [`HttpTransport`], and gets back a status
//! code and a body. Any failure to obtain a response at all is a
//! [`TransportError`].
//!
//! [`ReqwestTransport`] is the production implementation. Tests substitute
//! their own transport to script responses and count requests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Error type for transport failures (no response was obtained).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect or read timeout elapsed.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Could not establish a connection (DNS, refused, TLS).
    #[error("connection failed: {message}")]
    Connect { message: String },

    /// The request failed after the connection was established.
    #[error("request failed: {message}")]
    Request { message: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    Build { message: String },
}

/// HTTP method used by the protocol calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Form fields, sent as `application/x-www-form-urlencoded`.
    pub form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            form: None,
        }
    }

    /// Create a POST request with a form body.
    pub fn post_form<K, V>(url: Url, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            form: Some(form.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a query parameter value.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Look up a form field value.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        self.form
            .as_ref()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Send a request and wait for its response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

/// [`HttpTransport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| TransportError::Build {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let (timeout, connect) = (err.is_timeout(), err.is_connect());
        let message = err.without_url().to_string();
        if timeout {
            Self::Timeout { message }
        } else if connect {
            Self::Connect { message }
        } else {
            Self::Request { message }
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url),
            Method::Post => self.client.post(request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}
