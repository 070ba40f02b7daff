//! Output document construction: one page at a time, layers first, then
//! elements, then commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use super::document::SourceDocument;
use super::elements;
use super::font::EmbeddedFont;
use super::image::ImageAsset;
use super::page_index::PageIndex;
use crate::cache::CacheKey;
use crate::error::{Error, Result};
use crate::recipe::Element;

/// Everything fetched or rendered before composition starts.
#[derive(Debug, Default)]
pub struct ComposeAssets {
    /// Layer documents, bottom first
    pub layers: Vec<SourceDocument>,
    /// Fonts by family
    pub fonts: HashMap<String, Arc<EmbeddedFont>>,
    /// Images by URL
    pub images: HashMap<String, ImageAsset>,
    /// Rendered HTML fragments by cache key
    pub fragments: HashMap<CacheKey, SourceDocument>,
}

/// A font embedded into the output document.
struct FontResource {
    name: String,
    type0_id: ObjectId,
    used: BTreeMap<u16, char>,
}

/// Builds the output document. Each shared resource (font, image, fragment)
/// is embedded the first time a page uses it and referenced afterwards.
pub struct PageCompositor {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    assets: ComposeAssets,
    layer_maps: Vec<HashMap<ObjectId, ObjectId>>,
    fonts: HashMap<String, FontResource>,
    images: HashMap<String, (String, ObjectId)>,
    fragments: HashMap<CacheKey, (String, ObjectId, [f32; 4])>,
}

impl PageCompositor {
    pub fn new(assets: ComposeAssets) -> Result<Self> {
        if assets.layers.is_empty() {
            return Err(Error::InvalidRecipe(
                "at least one layer is required".to_string(),
            ));
        }

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let layer_maps = assets.layers.iter().map(|_| HashMap::new()).collect();

        Ok(Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            assets,
            layer_maps,
            fonts: HashMap::new(),
            images: HashMap::new(),
            fragments: HashMap::new(),
        })
    }

    /// Number of output pages: the page count of the bottom layer.
    pub fn page_count(&self) -> usize {
        self.assets.layers.first().map_or(0, SourceDocument::page_count)
    }

    pub fn layer_count(&self) -> usize {
        self.assets.layers.len()
    }

    /// Start output page `page`, sized like the bottom layer's page.
    pub fn begin_page(&mut self, page: usize) -> Result<PageBuilder<'_>> {
        let index = PageIndex::try_from_page_num(page, self.page_count()).ok_or_else(|| {
            Error::Merge {
                layer: 0,
                page,
                reason: format!("bottom layer has {} pages", self.page_count()),
            }
        })?;

        let media_box = self.assets.layers[0]
            .media_box(index)
            .ok_or_else(|| Error::Merge {
                layer: 0,
                page,
                reason: "page not found".to_string(),
            })?;

        debug!("Page {}: media box {:?}", page, media_box);

        Ok(PageBuilder {
            compositor: self,
            index,
            media_box,
            fonts: Dictionary::new(),
            xobjects: Dictionary::new(),
            operations: Vec::new(),
            drawn: 0,
        })
    }

    /// Close the page tree and catalog, and return the finished document.
    pub fn finish(mut self) -> Result<Document> {
        for font in self.fonts.values() {
            EmbeddedFont::attach_to_unicode(&mut self.doc, font.type0_id, &font.used)?;
        }

        let kids = self.page_ids.iter().map(|&id| Object::Reference(id)).collect();
        let count = i64::try_from(self.page_ids.len())
            .map_err(|e| Error::Engine(format!("page count: {e}")))?;
        let pages = Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ]);
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(self.pages_id)),
        ]));
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        self.doc.compress();
        Ok(self.doc)
    }

    fn font_resource(&mut self, family: &str) -> Result<(&mut FontResource, Arc<EmbeddedFont>)> {
        let font = self
            .assets
            .fonts
            .get(family)
            .cloned()
            .ok_or_else(|| Error::FontNotLoaded(family.to_string()))?;

        let next = self.fonts.len();
        let doc = &mut self.doc;
        let resource = self
            .fonts
            .entry(family.to_string())
            .or_insert_with(|| FontResource {
                name: format!("F{next}"),
                type0_id: font.embed(doc),
                used: BTreeMap::new(),
            });
        Ok((resource, font))
    }

    fn image_resource(&mut self, url: &str) -> Result<(String, ObjectId, u32, u32)> {
        let asset = self
            .assets
            .images
            .get(url)
            .ok_or_else(|| Error::Engine(format!("image {url} was not fetched")))?;

        if let Some((name, id)) = self.images.get(url) {
            return Ok((name.clone(), *id, asset.width, asset.height));
        }

        let id = asset.embed(&mut self.doc)?;
        let name = format!("Im{}", self.images.len());
        self.images.insert(url.to_string(), (name.clone(), id));
        Ok((name, id, asset.width, asset.height))
    }

    fn fragment_resource(&mut self, key: &CacheKey) -> Result<(String, ObjectId, [f32; 4])> {
        if let Some(entry) = self.fragments.get(key) {
            return Ok(entry.clone());
        }

        let fragment = self
            .assets
            .fragments
            .get(key)
            .ok_or_else(|| Error::Render(format!("fragment {key} was not rendered")))?;

        // Fragments are separate documents, so each gets its own id map
        let imported = fragment
            .import_page(PageIndex::new(0), &mut self.doc, &mut HashMap::new())?
            .ok_or_else(|| Error::Render(format!("fragment {key} has no pages")))?;

        let entry = (format!("Fr{}", self.fragments.len()), imported.form, imported.media_box);
        self.fragments.insert(key.clone(), entry.clone());
        Ok(entry)
    }
}

/// One output page under construction.
pub struct PageBuilder<'a> {
    compositor: &'a mut PageCompositor,
    index: PageIndex,
    media_box: [f32; 4],
    fonts: Dictionary,
    xobjects: Dictionary,
    operations: Vec<Operation>,
    drawn: usize,
}

impl PageBuilder<'_> {
    pub const fn media_box(&self) -> [f32; 4] {
        self.media_box
    }

    /// Merge every layer's corresponding page, bottom first.
    pub fn merge_layers(&mut self) -> Result<()> {
        for layer in 0..self.compositor.layer_count() {
            self.merge_layer(layer)?;
        }
        Ok(())
    }

    /// Draw this page of layer `layer` beneath everything drawn afterwards.
    pub fn merge_layer(&mut self, layer: usize) -> Result<()> {
        let page = self.index.as_usize();
        let PageCompositor {
            doc,
            assets,
            layer_maps,
            ..
        } = &mut *self.compositor;

        let (Some(source), Some(id_map)) = (assets.layers.get(layer), layer_maps.get_mut(layer))
        else {
            return Err(Error::Merge {
                layer,
                page,
                reason: "no such layer".to_string(),
            });
        };

        let imported = source
            .import_page(self.index, doc, id_map)
            .map_err(|e| Error::Merge {
                layer,
                page,
                reason: e.to_string(),
            })?
            .ok_or_else(|| Error::Merge {
                layer,
                page,
                reason: format!("layer has only {} pages", source.page_count()),
            })?;

        let name = format!("L{layer}");
        self.xobjects.set(name.as_bytes(), Object::Reference(imported.form));
        self.operations.extend(elements::layer(&name));
        Ok(())
    }

    /// Draw one element on top of the page.
    pub fn draw(&mut self, element: &Element) -> Result<()> {
        match element {
            Element::Text(text) => {
                let (resource, font) = self.compositor.font_resource(&text.font)?;
                let ops = elements::text(text, &font, &resource.name)?;
                for c in text.text.chars().filter(|c| *c != '\n') {
                    resource.used.entry(font.glyph_id(c)).or_insert(c);
                }
                self.fonts
                    .set(resource.name.as_bytes(), Object::Reference(resource.type0_id));
                self.operations.extend(ops);
            }
            Element::Image(image) => {
                let (name, id, width, height) = self.compositor.image_resource(&image.url)?;
                self.xobjects.set(name.as_bytes(), Object::Reference(id));
                self.operations
                    .extend(elements::image(&image.placement, &name, width, height));
            }
            Element::Html(html) => {
                let key = CacheKey::html(html);
                let (name, form, media_box) = self.compositor.fragment_resource(&key)?;
                self.xobjects.set(name.as_bytes(), Object::Reference(form));
                self.operations
                    .extend(elements::fragment(&html.placement, &name, media_box));
            }
        }
        self.drawn += 1;
        Ok(())
    }

    /// Write the content stream and page dictionary. Returns the number of
    /// elements drawn.
    pub fn commit(self) -> Result<usize> {
        let content = Content {
            operations: self.operations,
        }
        .encode()?;

        let doc = &mut self.compositor.doc;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let mut resources = Dictionary::new();
        if !self.fonts.is_empty() {
            resources.set("Font", Object::Dictionary(self.fonts));
        }
        if !self.xobjects.is_empty() {
            resources.set("XObject", Object::Dictionary(self.xobjects));
        }

        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(self.compositor.pages_id)),
            (
                "MediaBox",
                Object::Array(self.media_box.iter().map(|&v| Object::Real(v)).collect()),
            ),
            ("Resources", Object::Dictionary(resources)),
            ("Contents", Object::Reference(content_id)),
        ]));
        self.compositor.page_ids.push(page_id);

        debug!("Page {} committed with {} elements", self.index, self.drawn);
        Ok(self.drawn)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pdf::testing::blank_pdf;

    fn assets(layers: &[&[[f32; 4]]]) -> ComposeAssets {
        ComposeAssets {
            layers: layers
                .iter()
                .enumerate()
                .map(|(i, boxes)| {
                    SourceDocument::load_mem(&blank_pdf(boxes), &format!("layer {i}")).unwrap()
                })
                .collect(),
            ..ComposeAssets::default()
        }
    }

    fn save(doc: Document) -> Document {
        let mut doc = doc;
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        Document::load_mem(&out).unwrap()
    }

    #[test]
    fn test_pages_match_bottom_layer() {
        let boxes = [[0.0, 0.0, 200.0, 100.0], [0.0, 0.0, 300.0, 400.0]];
        let mut compositor = PageCompositor::new(assets(&[&boxes[..]])).unwrap();

        for page in 0..compositor.page_count() {
            let mut builder = compositor.begin_page(page).unwrap();
            builder.merge_layers().unwrap();
            builder.commit().unwrap();
        }

        let doc = save(compositor.finish().unwrap());
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        for (page_id, expected) in pages.values().zip(boxes) {
            assert_eq!(crate::pdf::import::media_box(&doc, *page_id), expected);
        }
    }

    #[test]
    fn test_missing_layer_page_is_merge_error() {
        let bottom = [[0.0, 0.0, 200.0, 100.0], [0.0, 0.0, 200.0, 100.0]];
        let top = [[0.0, 0.0, 200.0, 100.0]];
        let mut compositor = PageCompositor::new(assets(&[&bottom[..], &top[..]])).unwrap();

        let mut first = compositor.begin_page(0).unwrap();
        first.merge_layers().unwrap();
        first.commit().unwrap();

        let mut second = compositor.begin_page(1).unwrap();
        let err = second.merge_layers().unwrap_err();
        assert!(matches!(err, Error::Merge { layer: 1, page: 1, .. }));
    }

    #[test]
    fn test_two_layers_merged_in_order() {
        let page = [[0.0, 0.0, 200.0, 100.0]];
        let mut compositor = PageCompositor::new(assets(&[&page[..], &page[..]])).unwrap();

        let mut builder = compositor.begin_page(0).unwrap();
        builder.merge_layers().unwrap();
        builder.commit().unwrap();

        let doc = save(compositor.finish().unwrap());
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = doc.get_and_decode_page_content(page_id).unwrap();
        let drawn: Vec<_> = content
            .operations
            .iter()
            .filter(|op| op.operator == "Do")
            .map(|op| op.operands[0].as_name().unwrap().to_vec())
            .collect();
        assert_eq!(drawn, [b"L0".to_vec(), b"L1".to_vec()]);
    }

    #[test]
    fn test_text_without_font_fails() {
        let page = [[0.0, 0.0, 200.0, 100.0]];
        let mut compositor = PageCompositor::new(assets(&[&page[..]])).unwrap();
        let element: Element = serde_json::from_str(
            r#"{ "type": "text", "page": 0, "x": 0, "y": 0, "text": "x",
                 "font": "Missing", "size": 10, "color": "0,0,0,100" }"#,
        )
        .unwrap();

        let mut builder = compositor.begin_page(0).unwrap();
        let err = builder.draw(&element).unwrap_err();
        assert!(matches!(err, Error::FontNotLoaded(ref f) if f == "Missing"));
    }

    #[test]
    fn test_empty_layers_rejected() {
        assert!(PageCompositor::new(ComposeAssets::default()).is_err());
    }
}
