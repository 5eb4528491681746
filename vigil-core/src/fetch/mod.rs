//! The raw fetch primitive. [`MediaAcquirer`](crate::MediaAcquirer) composes
//! it; nothing here follows redirects or enforces size limits.

mod http;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::{
    StatusCode,
    header::{self, HeaderMap},
};
use thiserror::Error;
use url::Url;

pub use http::HttpFetcher;

/// A cancellable response body. Dropping the stream aborts the transfer.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {status}")]
    Status { status: StatusCode },

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    #[error("redirect response without a Location header")]
    MissingLocation,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("response exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("received {received} bytes but Content-Length declared {declared}")]
    LengthMismatch { declared: u64, received: u64 },

    #[error("body read failed: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Head,
    Get,
}

/// Inclusive byte range, rendered as `bytes=start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// The first `len` bytes of a resource. `len` must be non-zero.
    pub fn prefix(len: u64) -> Self {
        Self {
            start: 0,
            end_inclusive: len.saturating_sub(1),
        }
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: Url,
    pub range: Option<ByteRange>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn head(url: Url) -> Self {
        Self {
            method: FetchMethod::Head,
            url,
            range: None,
            timeout: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self {
            method: FetchMethod::Get,
            url,
            range: None,
            timeout: None,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Same request against a redirect target.
    pub fn redirected(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }
}

pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Declared `Content-Length`. Read from the header directly so HEAD
    /// responses report the resource size, not an empty body.
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(header::CONTENT_LENGTH)?.trim().parse().ok()
    }

    pub fn location(&self) -> Option<&str> {
        self.header_str(header::LOCATION)
    }

    /// Statuses that send the client elsewhere. 300 and 304 are not
    /// followed.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self.status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        )
    }

    fn header_str(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// A response whose body yields `chunks` in order. Used by fakes.
    pub fn from_chunks(
        status: StatusCode,
        headers: HeaderMap,
        chunks: Vec<Result<Bytes, FetchError>>,
    ) -> Self {
        Self {
            status,
            headers,
            body: Box::pin(futures::stream::iter(chunks)),
        }
    }

    pub fn empty(status: StatusCode, headers: HeaderMap) -> Self {
        Self::from_chunks(status, headers, Vec::new())
    }
}

/// Issue one HTTP exchange. Implementations must honor the per-call
/// timeout and must not follow redirects.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
