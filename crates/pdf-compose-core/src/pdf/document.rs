//! Source documents: layers and rendered HTML fragments.

use std::collections::HashMap;

use lopdf::{Document, ObjectId};

use super::import;
use super::page_index::PageIndex;
use crate::error::{Error, Result};

/// A parsed source PDF, read-only after loading.
#[derive(Debug)]
pub struct SourceDocument {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl SourceDocument {
    /// Parse PDF bytes. `label` names the source in error messages.
    pub fn load_mem(data: &[u8], label: &str) -> Result<Self> {
        let doc = Document::load_mem(data)
            .map_err(|e| Error::PdfOpen(format!("{label}: {e}")))?;
        // BTreeMap iteration is in page-number order
        let pages = doc.get_pages().into_values().collect();
        Ok(Self { doc, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_id(&self, page: PageIndex) -> Option<ObjectId> {
        self.pages.get(page.as_usize()).copied()
    }

    /// Media box of `page`, or `None` when the document has no such page.
    pub fn media_box(&self, page: PageIndex) -> Option<[f32; 4]> {
        self.page_id(page).map(|id| import::media_box(&self.doc, id))
    }

    /// Copy `page` into `target` as a Form XObject. Objects already copied
    /// through `id_map` are reused.
    pub fn import_page(
        &self,
        page: PageIndex,
        target: &mut Document,
        id_map: &mut HashMap<ObjectId, ObjectId>,
    ) -> Result<Option<ImportedPage>> {
        let Some(page_id) = self.page_id(page) else {
            return Ok(None);
        };
        let media_box = import::media_box(&self.doc, page_id);
        let form = import::import_page(&self.doc, page_id, media_box, target, id_map)?;
        Ok(Some(ImportedPage { form, media_box }))
    }
}

/// A page copied into the output document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportedPage {
    pub form: ObjectId,
    pub media_box: [f32; 4],
}
