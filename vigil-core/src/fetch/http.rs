use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, header, redirect};
use tracing::debug;

use super::{FetchError, FetchMethod, FetchRequest, FetchResponse, Fetcher};

/// [`Fetcher`] backed by a shared `reqwest` client. Redirects are disabled
/// on the client; the acquirer follows them itself so it can count hops.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    default_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, default_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| FetchError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self {
            client,
            default_timeout,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let url = request.url.to_string();

        let mut builder = match request.method {
            FetchMethod::Head => self.client.head(request.url),
            FetchMethod::Get => self.client.get(request.url),
        }
        .timeout(timeout);
        if let Some(range) = request.range {
            builder = builder.header(header::RANGE, range.header_value());
        }

        debug!(method = ?request.method, %url, range = ?request.range, "fetching");

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Transport {
                    url: url.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(move |err| {
            if err.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Body(err.to_string())
            }
        });

        Ok(FetchResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
