//! PDF Compose Core Library
//!
//! This library composes multi-page PDFs from a JSON recipe:
//! - Layering source PDFs page by page
//! - Drawing text, images and rendered HTML fragments on top
//! - Caching fetched and rendered resources (memory and disk)
//! - Streaming the result, or rasterizing it to PNG

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod pdf;
pub mod raster;
pub mod recipe;
pub mod render;
pub mod sink;
pub mod util;

pub use cache::{CacheKey, ContentCache, ResourceCache};
pub use config::ComposeConfig;
pub use error::{Error, Result, Stage};
pub use fetch::{Fetcher, HttpFetcher, create_fetcher};
pub use raster::{ImageMagick, RasterConverter, RasterMode, RasterOptions};
pub use recipe::{Element, Recipe};
pub use render::{HtmlRenderer, PdfRenderOptions, RendererLease, RendererPool, ScreenshotOptions};
pub use sink::{OutputMode, OutputStream};
pub use util::clear_resource_cache;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pdf::{ComposeAssets, EmbeddedFont, ImageAsset, PageCompositor, SourceDocument};
use recipe::HtmlElement;
use sink::ChannelWriter;

/// Called with `(pages_done, page_count)` after each committed page.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send>;

/// Statistics for one compose call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeSummary {
    pub pages: usize,
    pub layers: usize,
    pub elements_drawn: usize,
    pub bytes_written: u64,
}

/// A document composed in buffer mode.
#[derive(Debug)]
pub struct ComposedPdf {
    pub bytes: Vec<u8>,
    pub summary: ComposeSummary,
}

/// The result of [`PdfBuilder::compose_to`].
pub enum ComposeOutput {
    Buffer(ComposedPdf),
    Stream {
        stream: OutputStream,
        /// Resolves once the last byte has been handed to the stream
        handle: JoinHandle<Result<ComposeSummary>>,
    },
}

/// Lifecycle of a compose call, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposeState {
    Initializing,
    FetchingResources,
    ComposingPages(usize),
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for ComposeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::FetchingResources => f.write_str("fetching resources"),
            Self::ComposingPages(page) => write!(f, "composing page {page}"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

struct StateLog {
    state: ComposeState,
    started: Instant,
    entered: Instant,
}

impl StateLog {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: ComposeState::Initializing,
            started: now,
            entered: now,
        }
    }

    fn enter(&mut self, next: ComposeState) {
        let elapsed = self.entered.elapsed().as_millis();
        match next {
            // One line per page would drown out the stage transitions
            ComposeState::ComposingPages(_) => debug!("{} -> {} ({} ms)", self.state, next, elapsed),
            ComposeState::Done => info!(
                "{} -> {} ({} ms, {} ms total)",
                self.state,
                next,
                elapsed,
                self.started.elapsed().as_millis()
            ),
            _ => info!("{} -> {} ({} ms)", self.state, next, elapsed),
        }
        self.state = next;
        self.entered = Instant::now();
    }

    fn fail(&mut self, error: &Error) {
        warn!("{} -> failed: {} ({} stage)", self.state, error, error.stage());
        self.state = ComposeState::Failed;
    }
}

/// High-level PDF compositor that combines all components
#[derive(Clone)]
pub struct PdfBuilder {
    fetcher: Arc<dyn Fetcher>,
    cache: ResourceCache,
    renderers: Arc<RendererPool>,
    config: Arc<ComposeConfig>,
}

impl PdfBuilder {
    /// Create a new builder with the given configuration
    pub fn new(config: ComposeConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = create_fetcher(&config.fetch)?;
        let cache = ResourceCache::new(&config.cache)?;
        let renderers = render::create_renderer_pool(&config.renderer);

        Ok(Self::with_components(fetcher, cache, renderers, config))
    }

    /// Create with a shared cache (for cache sharing across instances)
    pub fn with_cache(config: ComposeConfig, cache: ResourceCache) -> Result<Self> {
        config.validate()?;
        let fetcher = create_fetcher(&config.fetch)?;
        let renderers = render::create_renderer_pool(&config.renderer);

        Ok(Self::with_components(fetcher, cache, renderers, config))
    }

    /// Create with custom collaborators
    pub fn with_components(
        fetcher: Arc<dyn Fetcher>,
        cache: ResourceCache,
        renderers: Arc<RendererPool>,
        config: ComposeConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            renderers,
            config: Arc::new(config),
        }
    }

    /// Compose `recipe` into one buffer.
    pub async fn compose(&self, recipe: Recipe) -> Result<ComposedPdf> {
        self.compose_with_progress(recipe, None).await
    }

    /// Parse a JSON recipe and compose it into one buffer.
    pub async fn compose_json(&self, json: &[u8]) -> Result<ComposedPdf> {
        self.compose(Recipe::from_json(json)?).await
    }

    /// Compose `recipe` into one buffer, reporting page progress.
    pub async fn compose_with_progress(
        &self,
        recipe: Recipe,
        progress: Option<ProgressCallback>,
    ) -> Result<ComposedPdf> {
        let (writer, stream) = sink::channel(&self.config.output);
        // The accumulator is listening before the first byte is produced
        let collector = tokio::spawn(stream.collect());
        let producer = self.spawn(recipe, writer, progress);

        let summary = join(producer).await?;
        let bytes = collector
            .await
            .map_err(|e| Error::Engine(format!("output collector failed: {e}")))??;

        Ok(ComposedPdf { bytes, summary })
    }

    /// Compose `recipe` as a live stream. Failures are delivered both through
    /// the stream (as a final error item) and through the handle.
    ///
    /// The document is serialized once every page is built, so the first
    /// chunk arrives at finalization; page progress is reported through
    /// `progress` meanwhile. The serialized bytes flow through the bounded
    /// channel as they are written and are never collected on this side.
    pub fn compose_stream(
        &self,
        recipe: Recipe,
        progress: Option<ProgressCallback>,
    ) -> (OutputStream, JoinHandle<Result<ComposeSummary>>) {
        let (writer, stream) = sink::channel(&self.config.output);
        let handle = self.spawn(recipe, writer, progress);
        (stream, handle)
    }

    /// Compose in the requested output mode.
    pub async fn compose_to(&self, recipe: Recipe, mode: OutputMode) -> Result<ComposeOutput> {
        match mode {
            OutputMode::Buffer => self.compose(recipe).await.map(ComposeOutput::Buffer),
            OutputMode::Stream => {
                let (stream, handle) = self.compose_stream(recipe, None);
                Ok(ComposeOutput::Stream { stream, handle })
            }
        }
    }

    /// Compose `recipe` and rasterize the result while it is being written.
    pub async fn rasterize(
        &self,
        recipe: Recipe,
        converter: &dyn RasterConverter,
        options: &RasterOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<(Bytes, ComposeSummary)> {
        let (stream, handle) = self.compose_stream(recipe, progress);
        let image = converter.convert(stream, options).await;
        let summary = join(handle).await;

        match (image, summary) {
            (Ok(image), Ok(summary)) => Ok((image, summary)),
            // The converter stopped reading first; the cancellation is its consequence
            (Err(e), Err(Error::Cancelled)) => Err(e),
            // Otherwise a compose failure explains a converter failure
            (_, Err(e)) | (Err(e), Ok(_)) => Err(e),
        }
    }

    /// Render an HTML page to PNG through the pooled renderer.
    pub async fn screenshot(&self, html: &str, options: &ScreenshotOptions) -> Result<Bytes> {
        let lease = self.renderers.acquire().await?;
        let result = lease.screenshot(html, options).await;
        self.release_renderer(lease, result.is_err()).await;
        result
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    fn spawn(
        &self,
        recipe: Recipe,
        writer: ChannelWriter,
        progress: Option<ProgressCallback>,
    ) -> JoinHandle<Result<ComposeSummary>> {
        let builder = self.clone();
        tokio::spawn(async move { builder.run(recipe, writer, progress).await })
    }

    async fn run(
        &self,
        recipe: Recipe,
        writer: ChannelWriter,
        progress: Option<ProgressCallback>,
    ) -> Result<ComposeSummary> {
        let mut log = StateLog::new();
        info!(
            "Composing {} layers, {} fonts, {} elements",
            recipe.layers.len(),
            recipe.fonts.len(),
            recipe.elements.len()
        );

        log.enter(ComposeState::FetchingResources);
        let assets = match self.fetch_assets(&recipe).await {
            Ok(assets) => assets,
            Err(e) => {
                log.fail(&e);
                writer.abort(&e).await;
                return Err(e);
            }
        };

        tokio::task::spawn_blocking(move || write_document(&recipe, assets, writer, progress, &mut log))
            .await
            .map_err(|e| Error::Engine(format!("compose worker failed: {e}")))?
    }

    /// Fetch and prepare everything the page loop needs.
    async fn fetch_assets(&self, recipe: &Recipe) -> Result<ComposeAssets> {
        recipe.validate()?;

        let fonts = self.load_fonts(recipe).await?;
        let layers = self.load_layers(recipe).await?;
        let images = self.load_images(recipe).await?;
        let fragments = self.render_fragments(recipe).await?;

        Ok(ComposeAssets {
            layers,
            fonts,
            images,
            fragments,
        })
    }

    /// All fonts concurrently, each cached under its family name.
    async fn load_fonts(&self, recipe: &Recipe) -> Result<HashMap<String, Arc<EmbeddedFont>>> {
        let loads = recipe.fonts.iter().map(|font| async move {
            let key = CacheKey::font(&font.family);
            let (data, hit) = self
                .cache
                .ensure_cached(&key, || self.fetcher.fetch(&font.url))
                .await?;
            debug!("Font {} ({})", font.family, if hit { "cached" } else { "fetched" });

            let parsed = EmbeddedFont::from_bytes(&font.family, data)?;
            Ok::<_, Error>((font.family.clone(), Arc::new(parsed)))
        });

        Ok(try_join_all(loads).await?.into_iter().collect())
    }

    /// Layers in declared order, one at a time. Layers are not cached.
    async fn load_layers(&self, recipe: &Recipe) -> Result<Vec<SourceDocument>> {
        let mut layers = Vec::with_capacity(recipe.layers.len());
        for (index, layer) in recipe.layers.iter().enumerate() {
            let data = self.fetcher.fetch(&layer.url).await?;
            let document = SourceDocument::load_mem(&data, &format!("layer {index} ({})", layer.url))?;
            debug!("Layer {} has {} pages", index, document.page_count());
            layers.push(document);
        }
        Ok(layers)
    }

    /// Distinct images, one at a time, cached under the URL hash plus the
    /// detected extension.
    async fn load_images(&self, recipe: &Recipe) -> Result<HashMap<String, ImageAsset>> {
        let mut images = HashMap::new();

        for url in recipe.image_urls() {
            let mut cached = None;
            for ext in ["png", "jpg"] {
                let key = CacheKey::image(url, ext);
                if let Some(data) = self.cache.get(&key).await {
                    cached = Some((key, data));
                    break;
                }
            }

            let asset = match cached {
                Some((key, data)) => match ImageAsset::from_bytes(url, data) {
                    Ok(asset) => {
                        debug!("Image {} (cached)", url);
                        asset
                    }
                    Err(e) => {
                        warn!("Dropping unreadable cached image {}: {}", url, e);
                        self.cache.remove(&key).await?;
                        self.fetch_image(url).await?
                    }
                },
                None => self.fetch_image(url).await?,
            };

            images.insert(url.to_string(), asset);
        }

        Ok(images)
    }

    async fn fetch_image(&self, url: &str) -> Result<ImageAsset> {
        let data = self.fetcher.fetch(url).await?;
        let format = pdf::detect_format(url, &data)?;
        let ext = pdf::extension(format).unwrap_or("png");
        let asset = ImageAsset::from_bytes(url, data.clone())?;
        self.cache.insert(&CacheKey::image(url, ext), data).await?;
        debug!("Image {} (fetched, {})", url, ext);
        Ok(asset)
    }

    /// Render each distinct HTML element once, through the renderer pool.
    async fn render_fragments(&self, recipe: &Recipe) -> Result<HashMap<CacheKey, SourceDocument>> {
        let mut fragments = HashMap::new();

        for element in recipe.html_elements() {
            let key = CacheKey::html(element);
            if fragments.contains_key(&key) {
                continue;
            }

            let (data, hit) = self
                .cache
                .ensure_cached(&key, || self.render_fragment(element))
                .await?;
            debug!("HTML fragment {} ({})", key, if hit { "cached" } else { "rendered" });

            let document = SourceDocument::load_mem(&data, &format!("html fragment {key}"))?;
            fragments.insert(key, document);
        }

        Ok(fragments)
    }

    async fn render_fragment(&self, element: &HtmlElement) -> Result<Bytes> {
        let lease = self.renderers.acquire().await?;
        let result = lease
            .render_pdf(&element.html, &PdfRenderOptions::for_element(element))
            .await;
        self.release_renderer(lease, result.is_err()).await;
        result
    }

    /// A renderer that just failed is not trusted with the next request.
    async fn release_renderer(&self, lease: RendererLease, failed: bool) {
        self.renderers.release(lease);
        if failed {
            self.renderers.invalidate().await;
        }
    }
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|e| Error::Engine(format!("compose task failed: {e}")))?
}

/// The page loop and document write. Runs on a blocking worker.
fn write_document(
    recipe: &Recipe,
    assets: ComposeAssets,
    mut writer: ChannelWriter,
    progress: Option<ProgressCallback>,
    log: &mut StateLog,
) -> Result<ComposeSummary> {
    match compose_pages(recipe, assets, &mut writer, progress.as_ref(), log) {
        Ok(mut summary) => {
            summary.bytes_written = writer.finish()?;
            log.enter(ComposeState::Done);
            Ok(summary)
        }
        Err(e) => {
            log.fail(&e);
            writer.fail(&e);
            Err(e)
        }
    }
}

fn compose_pages(
    recipe: &Recipe,
    assets: ComposeAssets,
    writer: &mut ChannelWriter,
    progress: Option<&ProgressCallback>,
    log: &mut StateLog,
) -> Result<ComposeSummary> {
    let mut compositor = PageCompositor::new(assets)?;
    let pages = compositor.page_count();
    let mut summary = ComposeSummary {
        pages,
        layers: compositor.layer_count(),
        ..ComposeSummary::default()
    };

    for page in 0..pages {
        if writer.is_closed() {
            return Err(Error::Cancelled);
        }
        log.enter(ComposeState::ComposingPages(page));

        let mut builder = compositor.begin_page(page)?;
        builder.merge_layers()?;
        for element in recipe.elements_for_page(page) {
            builder.draw(element)?;
        }
        summary.elements_drawn += builder.commit()?;

        if let Some(callback) = progress {
            callback(page + 1, pages);
        }
    }

    log.enter(ComposeState::Finalizing);
    let mut document = compositor.finish()?;
    document.save_to(&mut *writer).map_err(|e| {
        if writer.is_closed() {
            Error::Cancelled
        } else {
            Error::Engine(format!("failed to write document: {e}"))
        }
    })?;

    Ok(summary)
}
