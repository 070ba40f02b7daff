mod traits;
mod chromium;
mod pool;

pub use traits::{HtmlRenderer, PdfRenderOptions, RendererFactory, ScreenshotOptions};
pub use chromium::{ChromiumFactory, ChromiumRenderer};
pub use pool::{RendererLease, RendererPool};

use crate::config::RendererConfig;
use std::sync::Arc;

/// Create a renderer pool backed by the configured browser binary
pub fn create_renderer_pool(config: &RendererConfig) -> Arc<RendererPool> {
    Arc::new(RendererPool::new(Arc::new(ChromiumFactory::new(
        config.clone(),
    ))))
}
