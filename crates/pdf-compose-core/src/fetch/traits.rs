use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Trait for resource fetching backends
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Fetch the full body at `url`.
    ///
    /// Fails with [`crate::Error::Fetch`] on a non-success status or a
    /// transport error; the error carries the URL and the cause.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
