//! Integration tests for pdf-compose-core
//!
//! These tests drive the full compose pipeline with in-memory collaborators:
//! - Layer merging and page geometry
//! - Image and HTML fragment placement
//! - Resource fetching, deduplication and caching
//! - Text set in a real TrueType font
//! - Buffer and stream output, failure and cancellation
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use pdf_compose_core::cache::MemoryCache;
use pdf_compose_core::render::RendererFactory;
use pdf_compose_core::{
    CacheKey, ComposeConfig, ComposeOutput, Error, Fetcher, HtmlRenderer, OutputMode,
    OutputStream, PdfBuilder, PdfRenderOptions, RasterConverter, RasterOptions, Recipe,
    RendererPool, ResourceCache, Result, ScreenshotOptions, Stage,
};
use serde_json::json;

// =============================================================================
// Mock Collaborators
// =============================================================================

/// Serves resources from a map and counts requests per URL.
#[derive(Default)]
struct MockFetcher {
    resources: HashMap<String, Bytes>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    fn with(mut self, url: &str, data: impl Into<Bytes>) -> Self {
        self.resources.insert(url.to_string(), data.into());
        self
    }

    fn requests(&self, url: &str) -> usize {
        self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        *self.requests.lock().unwrap().entry(url.to_string()).or_default() += 1;
        self.resources.get(url).cloned().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

/// Renders every HTML element to a blank page of the requested size.
struct MockRenderer {
    renders: Arc<AtomicUsize>,
}

#[async_trait]
impl HtmlRenderer for MockRenderer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn render_pdf(&self, _html: &str, options: &PdfRenderOptions) -> Result<Bytes> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(pdf_with_pages(&[[
            0.0,
            0.0,
            options.page_width,
            options.page_height,
        ]])))
    }

    async fn screenshot(&self, _html: &str, _options: &ScreenshotOptions) -> Result<Bytes> {
        Ok(Bytes::from_static(b"\x89PNG"))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct MockFactory {
    renders: Arc<AtomicUsize>,
}

#[async_trait]
impl RendererFactory for MockFactory {
    async fn launch(&self) -> Result<Arc<dyn HtmlRenderer>> {
        Ok(Arc::new(MockRenderer {
            renders: Arc::clone(&self.renders),
        }))
    }
}

/// A renderer that reports healthy but fails every render.
struct BrokenRenderer;

#[async_trait]
impl HtmlRenderer for BrokenRenderer {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn render_pdf(&self, _html: &str, _options: &PdfRenderOptions) -> Result<Bytes> {
        Err(Error::Render("page crashed".to_string()))
    }

    async fn screenshot(&self, _html: &str, _options: &ScreenshotOptions) -> Result<Bytes> {
        Err(Error::Render("page crashed".to_string()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct BrokenFactory {
    launches: Arc<AtomicUsize>,
}

#[async_trait]
impl RendererFactory for BrokenFactory {
    async fn launch(&self) -> Result<Arc<dyn HtmlRenderer>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(BrokenRenderer))
    }
}

/// A raster converter that gives up without reading its input.
struct FailingConverter;

#[async_trait]
impl RasterConverter for FailingConverter {
    async fn convert(&self, input: OutputStream, _options: &RasterOptions) -> Result<Bytes> {
        drop(input);
        Err(Error::Raster("convert exited with status 1".to_string()))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// A PDF with one page per media box.
fn pdf_with_pages(media_boxes: &[[f32; 4]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = media_boxes
        .iter()
        .map(|media_box| {
            let content = Content {
                operations: vec![
                    Operation::new("re", vec![0.into(), 0.into(), 10.into(), 10.into()]),
                    Operation::new("f", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            let page_id = doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content_id)),
                (
                    "MediaBox",
                    Object::Array(media_box.iter().map(|&v| Object::Real(v)).collect()),
                ),
            ]));
            Object::Reference(page_id)
        })
        .collect();

    let count = i64::try_from(kids.len()).unwrap();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output).unwrap();
    output
}

/// A one-page PDF whose `/Contents` is an array: a path in the first
/// stream and the fill that paints it in the second.
fn pdf_with_split_contents() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let path_id = doc.add_object(Stream::new(Dictionary::new(), b"0 0 10 10 re".to_vec()));
    let fill_id = doc.add_object(Stream::new(Dictionary::new(), b"f".to_vec()));
    let page_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "Contents",
            Object::Array(vec![Object::Reference(path_id), Object::Reference(fill_id)]),
        ),
        (
            "MediaBox",
            Object::Array(LETTER.iter().map(|&v| Object::Real(v)).collect()),
        ),
    ]));
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(vec![Object::Reference(page_id)])),
            ("Count", Object::Integer(1)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output).unwrap();
    output
}

const MONO_TTF: &[u8] = include_bytes!("fixtures/DejaVuSansMono.ttf");

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut output = Cursor::new(Vec::new());
    img.write_to(&mut output, image::ImageFormat::Png).unwrap();
    output.into_inner()
}

const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const A5: [f32; 4] = [0.0, 0.0, 420.0, 595.0];

fn builder(fetcher: MockFetcher) -> (PdfBuilder, Arc<MockFetcher>) {
    builder_with(fetcher, ResourceCache::disabled(), Arc::new(AtomicUsize::new(0)))
}

fn builder_with(
    fetcher: MockFetcher,
    cache: ResourceCache,
    renders: Arc<AtomicUsize>,
) -> (PdfBuilder, Arc<MockFetcher>) {
    let fetcher = Arc::new(fetcher);
    let pool = Arc::new(RendererPool::new(Arc::new(MockFactory { renders })));
    let mut config = ComposeConfig::default();
    config.output.chunk_size = 512;
    config.output.channel_capacity = 2;

    let builder = PdfBuilder::with_components(
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        cache,
        pool,
        config,
    );
    (builder, fetcher)
}

fn recipe(value: serde_json::Value) -> Recipe {
    serde_json::from_value(value).unwrap()
}

fn page_operations(doc: &Document, page: u32) -> Vec<Operation> {
    let page_id = doc.get_pages()[&page];
    let content = doc.get_page_content(page_id).unwrap();
    Content::decode(&content).unwrap().operations
}

fn floats(op: &Operation) -> Vec<f32> {
    op.operands.iter().map(|o| o.as_float().unwrap()).collect()
}

fn media_box(doc: &Document, page: u32) -> Vec<f32> {
    let page_id = doc.get_pages()[&page];
    let dict = doc.get_dictionary(page_id).unwrap();
    dict.get(b"MediaBox")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o.as_float().unwrap())
        .collect()
}

/// Resolve `/Resources/<category>/<name>` on a page of the output.
fn page_resource<'a>(doc: &'a Document, page: u32, category: &[u8], name: &[u8]) -> &'a Object {
    let page_id = doc.get_pages()[&page];
    let page = doc.get_dictionary(page_id).unwrap();
    let (_, resources) = doc.dereference(page.get(b"Resources").unwrap()).unwrap();
    let (_, entries) = doc
        .dereference(resources.as_dict().unwrap().get(category).unwrap())
        .unwrap();
    let (_, resource) = doc
        .dereference(entries.as_dict().unwrap().get(name).unwrap())
        .unwrap();
    resource
}

fn xobject_names(ops: &[Operation]) -> Vec<String> {
    ops.iter()
        .filter(|op| op.operator == "Do")
        .map(|op| String::from_utf8(op.operands[0].as_name().unwrap().to_vec()).unwrap())
        .collect()
}

// =============================================================================
// Layers
// =============================================================================

#[tokio::test]
async fn test_pages_follow_bottom_layer() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER, A5]));
    let (builder, _) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })))
        .await
        .unwrap();

    assert!(composed.bytes.starts_with(b"%PDF"));
    assert_eq!(composed.summary.pages, 2);
    assert_eq!(composed.summary.layers, 1);
    assert_eq!(composed.summary.bytes_written, composed.bytes.len() as u64);

    let doc = Document::load_mem(&composed.bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 2);
    assert_eq!(media_box(&doc, 1), LETTER);
    assert_eq!(media_box(&doc, 2), A5);
}

#[tokio::test]
async fn test_layers_drawn_bottom_first() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER, LETTER]))
        .with("mem://overlay.pdf", pdf_with_pages(&[LETTER, LETTER]));
    let (builder, _) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }, { "url": "mem://overlay.pdf" }]
        })))
        .await
        .unwrap();

    let doc = Document::load_mem(&composed.bytes).unwrap();
    for page in 1..=2 {
        assert_eq!(xobject_names(&page_operations(&doc, page)), ["L0", "L1"]);
    }
}

#[tokio::test]
async fn test_short_layer_is_merge_error() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER, LETTER]))
        .with("mem://overlay.pdf", pdf_with_pages(&[LETTER]));
    let (builder, _) = builder(fetcher);

    let err = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }, { "url": "mem://overlay.pdf" }]
        })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Merge { layer: 1, page: 1, .. }), "got {err}");
    assert_eq!(err.stage(), Stage::Merge);
}

#[tokio::test]
async fn test_missing_layer_is_fetch_error() {
    let (builder, _) = builder(MockFetcher::default());

    let err = builder
        .compose(recipe(json!({ "layers": [{ "url": "mem://gone.pdf" }] })))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Fetch);
    assert!(err.to_string().contains("mem://gone.pdf"));
}

#[tokio::test]
async fn test_layer_with_split_contents() {
    let fetcher = MockFetcher::default().with("mem://split.pdf", pdf_with_split_contents());
    let (builder, _) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({ "layers": [{ "url": "mem://split.pdf" }] })))
        .await
        .unwrap();

    let doc = Document::load_mem(&composed.bytes).unwrap();
    let form = page_resource(&doc, 1, b"XObject", b"L0").as_stream().unwrap();
    let content = form.decompressed_content().unwrap_or_else(|_| form.content.clone());

    let operators: Vec<String> = Content::decode(&content)
        .unwrap()
        .operations
        .into_iter()
        .map(|op| op.operator)
        .collect();
    assert_eq!(operators, ["re", "f"]);
}

#[tokio::test]
async fn test_corrupt_layer_is_rejected() {
    let fetcher = MockFetcher::default().with("mem://bad.pdf", &b"not a pdf"[..]);
    let (builder, _) = builder(fetcher);

    let err = builder
        .compose(recipe(json!({ "layers": [{ "url": "mem://bad.pdf" }] })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PdfOpen(_)), "got {err}");
}

// =============================================================================
// Elements
// =============================================================================

#[tokio::test]
async fn test_image_scaled_to_width() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER]))
        .with("mem://logo.png", png(200, 50));
    let (builder, _) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [
                { "type": "image", "page": 0, "x": 72, "y": 700, "width": 100, "url": "mem://logo.png" }
            ]
        })))
        .await
        .unwrap();
    assert_eq!(composed.summary.elements_drawn, 1);

    let doc = Document::load_mem(&composed.bytes).unwrap();
    let ops = page_operations(&doc, 1);
    assert_eq!(xobject_names(&ops), ["L0", "Im0"]);

    let scaled = ops
        .iter()
        .filter(|op| op.operator == "cm")
        .map(floats)
        .any(|m| m == [100.0, 0.0, 0.0, 25.0, 0.0, 0.0]);
    assert!(scaled, "expected a 100x25 image matrix");
}

#[tokio::test]
async fn test_shared_image_fetched_once() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER, LETTER]))
        .with("mem://logo.png", png(20, 20));
    let (builder, fetcher) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [
                { "type": "image", "page": "all", "x": 10, "y": 10, "url": "mem://logo.png" },
                { "type": "image", "page": 1, "x": 50, "y": 50, "url": "mem://logo.png" }
            ]
        })))
        .await
        .unwrap();

    assert_eq!(fetcher.requests("mem://logo.png"), 1);
    assert_eq!(composed.summary.elements_drawn, 3);

    let doc = Document::load_mem(&composed.bytes).unwrap();
    assert_eq!(xobject_names(&page_operations(&doc, 1)), ["L0", "Im0"]);
    assert_eq!(xobject_names(&page_operations(&doc, 2)), ["L0", "Im0", "Im0"]);
}

#[tokio::test]
async fn test_unsupported_image_format() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER]))
        .with("mem://anim.gif", &b"GIF89a\x01\x00\x01\x00\x00\x00\x00;"[..]);
    let (builder, _) = builder(fetcher);

    let err = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [{ "type": "image", "page": 0, "x": 0, "y": 0, "url": "mem://anim.gif" }]
        })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedFormat { .. }), "got {err}");
}

#[tokio::test]
async fn test_text_with_undeclared_font() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER]));
    let (builder, fetcher) = builder(fetcher);

    let err = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [{
                "type": "text", "page": 0, "x": 10, "y": 10,
                "text": "Hello", "font": "Missing", "size": 12, "color": "0,0,0,100"
            }]
        })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FontNotLoaded(ref family) if family == "Missing"));
    // Validation fails before anything is fetched
    assert_eq!(fetcher.requests("mem://base.pdf"), 0);
}

#[tokio::test]
async fn test_corrupt_cached_image_is_refetched() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER]))
        .with("mem://logo.png", png(20, 10));
    let cache = ResourceCache::with_backends(vec![Arc::new(MemoryCache::new(16, 0))]);
    let key = CacheKey::image("mem://logo.png", "png");
    cache.insert(&key, Bytes::from_static(b"truncated")).await.unwrap();
    let (builder, fetcher) = builder_with(fetcher, cache.clone(), Arc::new(AtomicUsize::new(0)));

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [{ "type": "image", "page": 0, "x": 0, "y": 0, "url": "mem://logo.png" }]
        })))
        .await
        .unwrap();

    assert_eq!(composed.summary.elements_drawn, 1);
    assert_eq!(fetcher.requests("mem://logo.png"), 1);
    assert!(cache.get(&key).await.unwrap().starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn test_text_set_in_truetype_font() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER]))
        .with("mem://overlay.pdf", pdf_with_pages(&[LETTER]))
        .with("mem://mono.ttf", MONO_TTF);
    let (builder, fetcher) = builder(fetcher);

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }, { "url": "mem://overlay.pdf" }],
            "fonts": [{ "family": "Mono", "url": "mem://mono.ttf" }],
            "elements": [{
                "type": "text", "page": 0, "x": 10, "y": 10, "rotation": 0,
                "text": "A\nB", "font": "Mono", "size": 12, "color": "0,0,0,100", "align": "left"
            }]
        })))
        .await
        .unwrap();
    assert_eq!(fetcher.requests("mem://mono.ttf"), 1);
    assert_eq!(composed.summary.elements_drawn, 1);

    let doc = Document::load_mem(&composed.bytes).unwrap();
    let ops = page_operations(&doc, 1);
    assert_eq!(xobject_names(&ops), ["L0", "L1"]);

    // One positioned line per input line, the second one line height lower
    let origins: Vec<(f32, f32)> = ops
        .windows(2)
        .filter(|pair| pair[0].operator == "cm" && pair[1].operator == "BT")
        .map(|pair| {
            let m = floats(&pair[0]);
            (m[4], m[5])
        })
        .collect();
    assert_eq!(origins, [(10.0, 10.0), (10.0, -2.0)]);

    let face = ttf_parser::Face::parse(MONO_TTF, 0).unwrap();
    let glyph = |c: char| face.glyph_index(c).unwrap().0.to_be_bytes().to_vec();
    let shown: Vec<Vec<u8>> = ops
        .iter()
        .filter(|op| op.operator == "Tj")
        .map(|op| op.operands[0].as_str().unwrap().to_vec())
        .collect();
    assert_eq!(shown, [glyph('A'), glyph('B')]);

    let fills: Vec<Vec<f32>> = ops.iter().filter(|op| op.operator == "k").map(floats).collect();
    assert_eq!(fills, [[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]]);

    let font = page_resource(&doc, 1, b"Font", b"F0").as_dict().unwrap();
    assert_eq!(font.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
    assert_eq!(font.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");
    assert!(font.get(b"ToUnicode").is_ok());

    let descendants = font.get(b"DescendantFonts").unwrap().as_array().unwrap();
    let (_, cid_font) = doc.dereference(&descendants[0]).unwrap();
    let cid_font = cid_font.as_dict().unwrap();
    assert_eq!(cid_font.get(b"Subtype").unwrap().as_name().unwrap(), b"CIDFontType2");
}

#[tokio::test]
async fn test_html_fragment_rendered_once() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER, LETTER]));
    let renders = Arc::new(AtomicUsize::new(0));
    let (builder, _) = builder_with(fetcher, ResourceCache::disabled(), Arc::clone(&renders));

    let composed = builder
        .compose(recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }],
            "elements": [{
                "type": "html", "page": "all", "x": 36, "y": 36, "width": 100,
                "html": "<p>Hi</p>", "pageWidth": 200, "pageHeight": 100
            }]
        })))
        .await
        .unwrap();

    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let doc = Document::load_mem(&composed.bytes).unwrap();
    let ops = page_operations(&doc, 2);
    assert_eq!(xobject_names(&ops), ["L0", "Fr0"]);
    assert!(
        ops.iter()
            .filter(|op| op.operator == "cm")
            .map(floats)
            .any(|m| m == [0.5, 0.0, 0.0, 0.5, 0.0, 0.0])
    );
}

#[tokio::test]
async fn test_cached_fragment_not_rerendered() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER]));
    let renders = Arc::new(AtomicUsize::new(0));
    let cache = ResourceCache::with_backends(vec![Arc::new(MemoryCache::new(16, 0))]);
    let (builder, _) = builder_with(fetcher, cache, Arc::clone(&renders));

    let value = json!({
        "layers": [{ "url": "mem://base.pdf" }],
        "elements": [{
            "type": "html", "page": 0, "x": 0, "y": 0,
            "html": "<h1>Title</h1>", "pageWidth": 300, "pageHeight": 50
        }]
    });
    builder.compose(recipe(value.clone())).await.unwrap();
    builder.compose(recipe(value)).await.unwrap();

    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Output Modes
// =============================================================================

#[tokio::test]
async fn test_stream_matches_buffer() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 3]));
    let (builder, _) = builder(fetcher);
    let value = json!({ "layers": [{ "url": "mem://base.pdf" }] });

    let (stream, handle) = builder.compose_stream(recipe(value), None);
    let streamed = stream.collect().await.unwrap();
    let summary = handle.await.unwrap().unwrap();

    assert!(streamed.starts_with(b"%PDF"));
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.bytes_written, streamed.len() as u64);
    assert_eq!(Document::load_mem(&streamed).unwrap().get_pages().len(), 3);
}

#[tokio::test]
async fn test_stream_ends_with_error() {
    let fetcher = MockFetcher::default()
        .with("mem://base.pdf", pdf_with_pages(&[LETTER, LETTER]))
        .with("mem://overlay.pdf", pdf_with_pages(&[LETTER]));
    let (builder, _) = builder(fetcher);

    let (stream, handle) = builder.compose_stream(
        recipe(json!({
            "layers": [{ "url": "mem://base.pdf" }, { "url": "mem://overlay.pdf" }]
        })),
        None,
    );

    let err = stream.collect().await.unwrap_err();
    assert!(err.to_string().contains("layer 1"));
    assert!(matches!(handle.await.unwrap(), Err(Error::Merge { .. })));
}

#[tokio::test]
async fn test_dropped_stream_cancels() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 4]));
    let (builder, _) = builder(fetcher);

    let (stream, handle) =
        builder.compose_stream(recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })), None);
    // Current-thread runtime: the task has not run yet
    drop(stream);

    assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_progress_reported_per_page() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 3]));
    let (builder, _) = builder(fetcher);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    builder
        .compose_with_progress(
            recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })),
            Some(Box::new(move |done, total| sink.lock().unwrap().push((done, total)))),
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), [(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn test_compose_to_buffer() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 2]));
    let (builder, _) = builder(fetcher);

    let output = builder
        .compose_to(recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })), OutputMode::Buffer)
        .await
        .unwrap();

    let ComposeOutput::Buffer(composed) = output else {
        panic!("expected a buffer");
    };
    assert_eq!(composed.summary.pages, 2);
    assert_eq!(Document::load_mem(&composed.bytes).unwrap().get_pages().len(), 2);
}

#[tokio::test]
async fn test_compose_to_stream() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 2]));
    let (builder, _) = builder(fetcher);

    let output = builder
        .compose_to(recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })), OutputMode::Stream)
        .await
        .unwrap();

    let ComposeOutput::Stream { stream, handle } = output else {
        panic!("expected a stream");
    };
    let streamed = stream.collect().await.unwrap();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.bytes_written, streamed.len() as u64);
    assert_eq!(Document::load_mem(&streamed).unwrap().get_pages().len(), 2);
}

#[tokio::test]
async fn test_converter_failure_is_reported() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER; 4]));
    let (builder, _) = builder(fetcher);

    let err = builder
        .rasterize(
            recipe(json!({ "layers": [{ "url": "mem://base.pdf" }] })),
            &FailingConverter,
            &RasterOptions::default(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Raster(ref msg) if msg.contains("status 1")), "got {err}");
}

#[tokio::test]
async fn test_failed_render_relaunches_renderer() {
    let fetcher = MockFetcher::default().with("mem://base.pdf", pdf_with_pages(&[LETTER]));
    let launches = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(RendererPool::new(Arc::new(BrokenFactory {
        launches: Arc::clone(&launches),
    })));
    let builder = PdfBuilder::with_components(
        Arc::new(fetcher),
        ResourceCache::disabled(),
        pool,
        ComposeConfig::default(),
    );
    let value = json!({
        "layers": [{ "url": "mem://base.pdf" }],
        "elements": [{
            "type": "html", "page": 0, "x": 0, "y": 0,
            "html": "<p>x</p>", "pageWidth": 100, "pageHeight": 100
        }]
    });

    for _ in 0..2 {
        let err = builder.compose(recipe(value.clone())).await.unwrap_err();
        assert!(matches!(err, Error::Render(_)), "got {err}");
    }
    assert_eq!(launches.load(Ordering::SeqCst), 2);

    assert!(builder.screenshot("<p>x</p>", &ScreenshotOptions::default()).await.is_err());
    assert_eq!(launches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_compose_json_rejects_empty_layers() {
    let (builder, _) = builder(MockFetcher::default());

    let err = builder.compose_json(br#"{ "layers": [] }"#).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRecipe(_)));

    let err = builder.compose_json(b"{ not json").await.unwrap_err();
    assert!(matches!(err, Error::RecipeParse(_)));
}

#[tokio::test]
async fn test_screenshot_uses_pool() {
    let (builder, _) = builder(MockFetcher::default());
    let png = builder
        .screenshot("<p>x</p>", &ScreenshotOptions::default())
        .await
        .unwrap();
    assert!(png.starts_with(b"\x89PNG"));
}
