mod traits;
mod http;

pub use traits::Fetcher;
pub use http::HttpFetcher;

use crate::config::FetchConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create a fetcher from configuration
pub fn create_fetcher(config: &FetchConfig) -> Result<Arc<dyn Fetcher>> {
    Ok(Arc::new(HttpFetcher::new(config)?))
}
