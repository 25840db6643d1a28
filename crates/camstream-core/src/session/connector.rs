//! Opening the camera's byte stream
//!
//! [`Connector`] is the seam between the session and the network. The HTTP
//! implementation issues a plain GET and hands back the body as a stream of
//! chunks; chunk sizes are whatever the transport delivers.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONNECTION, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StreamError;

/// Response body as raw chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: String,
    pub user_agent: String,
}

/// An open stream response
pub struct Connection {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl Connection {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Warn when the response does not look like an MJPEG stream
    ///
    /// The boundary is never taken from this header; the configured literal is
    /// used regardless.
    pub fn check_content_type(&self) {
        let content_type = self.content_type.as_deref().unwrap_or("");
        debug!("Stream Content-Type: {}", content_type);
        if !content_type.contains("multipart/x-mixed-replace")
            && !content_type.contains("image/jpeg")
        {
            warn!("Unexpected Content-Type: {:?}", content_type);
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &StreamRequest) -> Result<Connection, StreamError>;
}

/// HTTP connector with a connect timeout and no read timeout
///
/// Streams are long-lived and bursty, so a read can block for as long as the
/// camera stays silent; only closing the connection or cancelling the session
/// ends it.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            // Each session runs its own runtime; pooled connections must not outlive it
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, request: &StreamRequest) -> Result<Connection, StreamError> {
        debug!("Connecting to stream {}", request.url);
        let response = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "keep-alive")
            .send()
            .await?;

        debug!("Stream response headers: {:?}", response.headers());
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(Connection {
            status,
            content_type,
            body: response.bytes_stream().map_err(StreamError::from).boxed(),
        })
    }
}
