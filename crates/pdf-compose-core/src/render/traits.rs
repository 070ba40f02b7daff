use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;
use crate::recipe::HtmlElement;

/// Page geometry for rendering HTML to a single-page PDF fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfRenderOptions {
    /// Page width in points
    pub page_width: f32,
    /// Page height in points
    pub page_height: f32,
    pub print_background: bool,
}

impl PdfRenderOptions {
    pub const fn for_element(element: &HtmlElement) -> Self {
        Self {
            page_width: element.page_width,
            page_height: element.page_height,
            print_background: true,
        }
    }
}

/// Viewport for rendering HTML to a PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Trait for HTML rendering backends
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Render `html` to PDF bytes.
    async fn render_pdf(&self, html: &str, options: &PdfRenderOptions) -> Result<Bytes>;

    /// Render `html` to PNG bytes.
    async fn screenshot(&self, html: &str, options: &ScreenshotOptions) -> Result<Bytes>;

    /// Whether the renderer can still serve requests.
    async fn health_check(&self) -> bool;
}

/// Launches renderer instances for a [`super::RendererPool`].
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn HtmlRenderer>>;
}
