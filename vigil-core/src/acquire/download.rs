use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::MediaAcquirer;
use crate::{
    error::AcquireError,
    fetch::{BodyStream, ByteRange, FetchError, FetchRequest, FetchResponse},
};

/// What to pull for a video after probing it with HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RangePlan {
    /// The resource fits; take all of it and reject anything larger.
    Whole,
    /// Take the first `max_bytes` bytes.
    Prefix(ByteRange),
}

/// How a body is cut at the byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    Reject,
    Truncate,
}

/// Accepts body chunks until `limit` bytes have been taken.
#[derive(Debug)]
struct Budget {
    limit: u64,
    taken: u64,
    overflow: Overflow,
}

impl Budget {
    fn new(limit: u64, overflow: Overflow) -> Self {
        Self {
            limit,
            taken: 0,
            overflow,
        }
    }

    /// The part of `chunk` that still fits, or `TooLarge` in reject mode.
    /// An empty slice means the budget is spent.
    fn admit<'a>(&mut self, chunk: &'a [u8]) -> Result<&'a [u8], FetchError> {
        let room = self.limit - self.taken;
        let len = chunk.len() as u64;
        if len <= room {
            self.taken += len;
            return Ok(chunk);
        }
        match self.overflow {
            Overflow::Reject => Err(FetchError::TooLarge { limit: self.limit }),
            Overflow::Truncate => {
                self.taken = self.limit;
                // room < len <= usize::MAX
                Ok(&chunk[..room as usize])
            }
        }
    }

    fn spent(&self) -> bool {
        self.overflow == Overflow::Truncate && self.taken >= self.limit
    }
}

/// 200/206 carry a body; 416 and everything else is a failure.
pub(super) fn expect_body(response: &FetchResponse) -> Result<(), FetchError> {
    match response.status {
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(()),
        StatusCode::RANGE_NOT_SATISFIABLE => Err(FetchError::RangeNotSatisfiable),
        status => Err(FetchError::Status { status }),
    }
}

fn check_declared(declared: Option<u64>, received: u64) -> Result<(), FetchError> {
    match declared {
        Some(declared) if received > declared => {
            Err(FetchError::LengthMismatch { declared, received })
        }
        _ => Ok(()),
    }
}

async fn collect(body: &mut BodyStream, mut budget: Budget) -> Result<Bytes, FetchError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(budget.admit(&chunk)?);
        if budget.spent() {
            break;
        }
    }
    Ok(buffer.freeze())
}

async fn write_to(
    body: &mut BodyStream,
    mut budget: Budget,
    path: &Path,
) -> Result<u64, AcquireError> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(budget.admit(&chunk)?).await?;
        if budget.spent() {
            break;
        }
    }
    file.flush().await?;
    Ok(budget.taken)
}

impl MediaAcquirer {
    /// Send `request`, following up to `max_redirects` redirects by hand.
    /// Returns the final URL with its response.
    pub(super) async fn send_following(
        &self,
        mut request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<(Url, FetchResponse), AcquireError> {
        let limit = self.limits.max_redirects;
        for _ in 0..=limit {
            let response = cancel
                .run_until_cancelled(self.fetcher.send(request.clone()))
                .await
                .ok_or(AcquireError::Cancelled)??;
            if !response.is_redirect() {
                return Ok((request.url, response));
            }
            let location = response.location().ok_or(FetchError::MissingLocation)?;
            let next = request
                .url
                .join(location)
                .map_err(|err| FetchError::InvalidUrl(format!("{location}: {err}")))?;
            debug!(from = %request.url, to = %next, "following redirect");
            request = request.redirected(next);
        }
        Err(FetchError::TooManyRedirects { limit }.into())
    }

    /// Single bounded GET into memory. Used for images.
    pub(super) async fn download_to_memory(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Bytes, AcquireError> {
        let timeout = self.limits.download_timeout;
        self.guarded(cancel, timeout, async {
            let request = FetchRequest::get(url.clone()).with_timeout(timeout);
            let (_, mut response) = self.send_following(request, cancel).await?;
            expect_body(&response)?;
            self.reject_declared_oversize(&response)?;
            let bytes = collect(
                &mut response.body,
                Budget::new(self.limits.max_bytes, Overflow::Reject),
            )
            .await?;
            Ok(bytes)
        })
        .await
    }

    /// Single bounded GET streamed to `path`. Used for images in file mode.
    pub(super) async fn download_to_file(
        &self,
        url: &Url,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, AcquireError> {
        let timeout = self.limits.download_timeout;
        self.guarded(cancel, timeout, async {
            let request = FetchRequest::get(url.clone()).with_timeout(timeout);
            let (_, mut response) = self.send_following(request, cancel).await?;
            expect_body(&response)?;
            self.reject_declared_oversize(&response)?;
            write_to(
                &mut response.body,
                Budget::new(self.limits.max_bytes, Overflow::Reject),
                path,
            )
            .await
        })
        .await
    }

    fn reject_declared_oversize(&self, response: &FetchResponse) -> Result<(), FetchError> {
        match response.content_length() {
            Some(len) if len > self.limits.max_bytes => Err(FetchError::TooLarge {
                limit: self.limits.max_bytes,
            }),
            _ => Ok(()),
        }
    }

    /// HEAD the resource and decide between a whole or a prefix download.
    /// Returns the post-redirect URL so the GET skips the hops.
    pub(super) async fn plan_range(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(Url, RangePlan), AcquireError> {
        let timeout = self.limits.download_timeout;
        let request = FetchRequest::head(url.clone()).with_timeout(timeout);
        let (resolved, response) = self.send_following(request, cancel).await?;
        if !response.status.is_success() {
            return Err(FetchError::Status {
                status: response.status,
            }
            .into());
        }

        let max = self.limits.max_bytes;
        let plan = match response.content_length() {
            Some(len) if len <= max => RangePlan::Whole,
            _ => RangePlan::Prefix(ByteRange::prefix(max)),
        };
        debug!(url = %resolved, declared = ?response.content_length(), ?plan, "range plan");
        Ok((resolved, plan))
    }

    async fn open_ranged(
        &self,
        url: &Url,
        plan: RangePlan,
        cancel: &CancellationToken,
    ) -> Result<(FetchResponse, Budget), AcquireError> {
        let mut request =
            FetchRequest::get(url.clone()).with_timeout(self.limits.download_timeout);
        let overflow = match plan {
            RangePlan::Whole => Overflow::Reject,
            RangePlan::Prefix(range) => {
                request = request.with_range(range);
                Overflow::Truncate
            }
        };
        let (_, response) = self.send_following(request, cancel).await?;
        expect_body(&response)?;
        Ok((response, Budget::new(self.limits.max_bytes, overflow)))
    }

    /// Tier 2 download: whole resource or prefix, into memory.
    pub(super) async fn download_range(
        &self,
        url: &Url,
        plan: RangePlan,
        cancel: &CancellationToken,
    ) -> Result<Bytes, AcquireError> {
        self.guarded(cancel, self.limits.download_timeout, async {
            let (mut response, budget) = self.open_ranged(url, plan, cancel).await?;
            let declared = response.content_length();
            let bytes = collect(&mut response.body, budget).await?;
            check_declared(declared, bytes.len() as u64)?;
            Ok(bytes)
        })
        .await
    }

    /// Tier 3 download: same plan, streamed to `path`.
    pub(super) async fn download_range_to_file(
        &self,
        url: &Url,
        plan: RangePlan,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, AcquireError> {
        self.guarded(cancel, self.limits.download_timeout, async {
            let (mut response, budget) = self.open_ranged(url, plan, cancel).await?;
            let declared = response.content_length();
            let written = write_to(&mut response.body, budget, path).await?;
            check_declared(declared, written)?;
            Ok(written)
        })
        .await
    }
}
