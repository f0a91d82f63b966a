//! HTTP transport capability

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::TransportError;

/// Readable response body
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

pub const STATUS_OK: u16 = 200;
pub const STATUS_PARTIAL_CONTENT: u16 = 206;
pub const STATUS_RANGE_NOT_SATISFIABLE: u16 = 416;

/// A GET request, optionally starting at a byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// First byte requested (`Range: bytes=<start>-`)
    pub range_start: Option<u64>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range_start: None,
        }
    }

    /// Request the resource starting at `offset`; zero means the whole resource
    pub fn with_range_from(mut self, offset: u64) -> Self {
        self.range_start = (offset > 0).then_some(offset);
        self
    }

    /// Value of the `Range` header, if any
    pub fn range_header(&self) -> Option<String> {
        self.range_start.map(|start| format!("bytes={}-", start))
    }
}

/// Response head plus a streaming body
pub struct HttpResponse {
    pub status: u16,
    /// Declared body length; for ranged responses this is the remaining length
    pub content_length: Option<u64>,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: BodyReader,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_partial_content(&self) -> bool {
        self.status == STATUS_PARTIAL_CONTENT
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Read the whole body as UTF-8 text
    pub async fn text(mut self) -> Result<String, TransportError> {
        let mut text = String::new();
        self.body.read_to_string(&mut text).await?;
        Ok(text)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests for catalogs and model files
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and return once the response head is available
    ///
    /// Non-success statuses are returned as responses, not errors.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with its own client
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        if let Some(range) = request.range_header() {
            debug!("GET {} ({})", request.url, range);
            builder = builder.header(reqwest::header::RANGE, range);
        } else {
            debug!("GET {}", request.url);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let stream = response.bytes_stream().map_err(io::Error::other);
        let body: BodyReader = Box::new(StreamReader::new(Box::pin(stream)));

        Ok(HttpResponse {
            status,
            content_length,
            headers,
            body,
        })
    }
}
