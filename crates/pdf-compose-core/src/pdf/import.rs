//! Copying pages of one document into another as Form XObjects.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::Result;

/// Deep-copies objects from a source document into a target document.
///
/// The id map is owned by the caller so repeated imports from the same source
/// (one page per output page) share fonts and images that were already copied.
pub struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: &'a mut HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    pub fn new(
        source: &'a Document,
        target: &'a mut Document,
        id_map: &'a mut HashMap<ObjectId, ObjectId>,
    ) -> Self {
        Self {
            source,
            target,
            id_map,
        }
    }

    /// Copy `source_id` and everything it references, once.
    pub fn copy_object(&mut self, source_id: ObjectId) -> Result<ObjectId> {
        if let Some(target_id) = self.id_map.get(&source_id) {
            return Ok(*target_id);
        }

        // Reserve the id before recursing so reference cycles terminate
        let new_id = self.target.add_object(Object::Null);
        self.id_map.insert(source_id, new_id);

        let obj = self.source.get_object(source_id)?.clone();
        let new_obj = self.remap_references(obj)?;
        self.target.objects.insert(new_id, new_obj);

        Ok(new_id)
    }

    /// Replace every reference inside `obj` with its copied counterpart.
    pub fn remap_references(&mut self, obj: Object) -> Result<Object> {
        match obj {
            Object::Reference(id) => Ok(Object::Reference(self.copy_object(id)?)),
            Object::Array(arr) => arr
                .into_iter()
                .map(|o| self.remap_references(o))
                .collect::<Result<Vec<_>>>()
                .map(Object::Array),
            Object::Dictionary(dict) => Ok(Object::Dictionary(self.remap_dict(dict)?)),
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dict(stream.dict)?;
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }

    fn remap_dict(&mut self, mut dict: Dictionary) -> Result<Dictionary> {
        for (_, value) in dict.iter_mut() {
            let taken = std::mem::replace(value, Object::Null);
            *value = self.remap_references(taken)?;
        }
        Ok(dict)
    }
}

/// Wrap page `page_id` of `source` into a Form XObject inside `target`.
///
/// The form's BBox is the page's media box, so drawing it with an identity
/// transform reproduces the page at its original position.
pub fn import_page(
    source: &Document,
    page_id: ObjectId,
    media_box: [f32; 4],
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
) -> Result<ObjectId> {
    let content = page_content(source, page_id);
    let resources = resolve_resources(source, page_id);

    let mut copier = ObjectCopier::new(source, target, id_map);
    let resources = copier.remap_references(Object::Dictionary(resources))?;

    let dict = Dictionary::from_iter([
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Form".to_vec())),
        ("FormType", Object::Integer(1)),
        (
            "BBox",
            Object::Array(media_box.iter().map(|&v| Object::Real(v)).collect()),
        ),
        ("Resources", resources),
    ]);

    let stream = Stream::new(dict, content).with_compression(true);
    Ok(target.add_object(stream))
}

/// The decoded content of every stream in the page's `/Contents`, one per
/// line. Streams are split at token boundaries only, so they must not be
/// glued back together without a separator.
pub fn page_content(doc: &Document, page_id: ObjectId) -> Vec<u8> {
    let mut content = Vec::new();
    for id in doc.get_page_contents(page_id) {
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            continue;
        };
        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        if !content.is_empty() {
            content.push(b'\n');
        }
        content.extend_from_slice(&data);
    }
    content
}

/// Resolve the Resources dictionary of a page, following indirect references
/// and inheritance from parent Pages nodes. Pages without resources get an
/// empty dictionary.
pub fn resolve_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let Ok(Object::Dictionary(page)) = doc.get_object(page_id) else {
        return Dictionary::new();
    };

    inherited(doc, page, b"Resources", MAX_TREE_DEPTH)
        .and_then(|obj| resolve_dict(doc, obj))
        .unwrap_or_default()
}

/// Get media box of a page, walking up the page tree. Defaults to US Letter.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Ok(Object::Dictionary(page)) = doc.get_object(page_id) else {
        return DEFAULT_MEDIA_BOX;
    };

    let values = inherited(doc, page, b"MediaBox", MAX_TREE_DEPTH).and_then(|obj| {
        let arr = doc.dereference(obj).ok()?.1.as_array().ok()?;
        let values: Vec<f32> = arr.iter().filter_map(number).collect();
        <[f32; 4]>::try_from(values).ok()
    });

    values.unwrap_or(DEFAULT_MEDIA_BOX)
}

const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Bound on Parent hops, for malformed trees with cycles.
const MAX_TREE_DEPTH: usize = 32;

/// Look up an inheritable page attribute on the node or its ancestors.
fn inherited<'a>(doc: &'a Document, node: &'a Dictionary, key: &[u8], depth: usize) -> Option<&'a Object> {
    if let Ok(value) = node.get(key) {
        return Some(value);
    }
    if depth == 0 {
        return None;
    }
    let Ok(Object::Reference(parent_id)) = node.get(b"Parent") else {
        return None;
    };
    let Ok(Object::Dictionary(parent)) = doc.get_object(*parent_id) else {
        return None;
    };
    inherited(doc, parent, key, depth - 1)
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Dictionary(d)) => Some(d.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}
