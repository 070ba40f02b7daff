//! TrueType font embedding for recipe text.
//!
//! Fonts are embedded as composite fonts with Identity-H encoding, so any
//! glyph the font carries can be drawn by its glyph ID:
//! - **Type0 font**: the font resource referenced from content streams
//!   - **CIDFontType2**: per-glyph widths (`W`) and the font descriptor
//!     - **FontDescriptor**: metrics plus the **FontFile2** program
//!   - **ToUnicode CMap**: glyph IDs back to the characters that were drawn

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use bytes::Bytes;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{Face, GlyphId};

use super::layout::TextMeasure;
use crate::error::{Error, Result};

/// A parsed font file with the metrics needed for layout and embedding.
pub struct EmbeddedFont {
    family: String,
    data: Bytes,
    glyphs: HashMap<char, u16>,
    advances: Vec<u16>,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    cap_height: i16,
    bbox: [i16; 4],
}

impl std::fmt::Debug for EmbeddedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedFont")
            .field("family", &self.family)
            .field("glyphs", &self.advances.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddedFont {
    /// Parse a TrueType/OpenType font.
    pub fn from_bytes(family: &str, data: Bytes) -> Result<Self> {
        let face = Face::parse(&data, 0).map_err(|e| Error::FontParse {
            family: family.to_string(),
            reason: e.to_string(),
        })?;

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|codepoint| {
                    if let Some(c) = char::from_u32(codepoint)
                        && let Some(gid) = subtable.glyph_index(codepoint)
                    {
                        glyphs.entry(c).or_insert(gid.0);
                    }
                });
            }
        }

        let advances = (0..face.number_of_glyphs())
            .map(|gid| face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0))
            .collect();

        let rect = face.global_bounding_box();

        Ok(Self {
            family: family.to_string(),
            glyphs,
            advances,
            units_per_em: face.units_per_em(),
            ascender: face.ascender(),
            descender: face.descender(),
            cap_height: face.capital_height().unwrap_or_else(|| face.ascender()),
            bbox: [rect.x_min, rect.y_min, rect.x_max, rect.y_max],
            data,
        })
    }

    /// Get the glyph ID for a character, falling back to .notdef (0) if not found.
    pub fn glyph_id(&self, c: char) -> u16 {
        self.glyphs.get(&c).copied().unwrap_or(0)
    }

    /// Get the advance width of a glyph in font units.
    pub fn glyph_width(&self, glyph_id: u16) -> u16 {
        self.advances.get(usize::from(glyph_id)).copied().unwrap_or(0)
    }

    /// Glyph IDs for `text`, big-endian, as an Identity-H encoded string.
    pub fn encode(&self, text: &str) -> Object {
        let bytes = text
            .chars()
            .flat_map(|c| self.glyph_id(c).to_be_bytes())
            .collect();
        Object::String(bytes, StringFormat::Hexadecimal)
    }

    /// PostScript-safe name used for BaseFont and FontName.
    pub fn base_font_name(&self) -> String {
        let name: String = self
            .family
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if name.is_empty() { "Font".to_string() } else { name }
    }

    /// Scale a font-unit width to PDF's 1000-unit glyph space.
    fn scale_width(&self, width: u16) -> i64 {
        let units_per_em = i64::from(self.units_per_em.max(1));
        (i64::from(width) * 1000) / units_per_em
    }

    /// Add the font program and dictionaries to `doc`. Returns the Type0 font id;
    /// the ToUnicode map is attached later with [`Self::attach_to_unicode`].
    pub fn embed(&self, doc: &mut Document) -> ObjectId {
        let font_file_id = self.create_font_file(doc);
        let font_descriptor_id = self.create_font_descriptor(doc, font_file_id);
        let cid_font_id = self.create_cid_font(doc, font_descriptor_id);
        self.create_type0_font(doc, cid_font_id)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn create_font_file(&self, doc: &mut Document) -> ObjectId {
        let mut dict = Dictionary::new();
        dict.set("Length1", Object::Integer(self.data.len() as i64));

        let stream = Stream::new(dict, self.data.to_vec()).with_compression(true);
        doc.add_object(Object::Stream(stream))
    }

    fn create_font_descriptor(&self, doc: &mut Document, font_file_id: ObjectId) -> ObjectId {
        let [x_min, y_min, x_max, y_max] = self.bbox;

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"FontDescriptor".to_vec())),
            ("FontName", Object::Name(self.base_font_name().into_bytes())),
            (
                "FontFamily",
                Object::String(self.family.as_bytes().to_vec(), StringFormat::Literal),
            ),
            // Nonsymbolic
            ("Flags", Object::Integer(32)),
            (
                "FontBBox",
                Object::Array(vec![
                    Object::Integer(i64::from(x_min)),
                    Object::Integer(i64::from(y_min)),
                    Object::Integer(i64::from(x_max)),
                    Object::Integer(i64::from(y_max)),
                ]),
            ),
            ("ItalicAngle", Object::Integer(0)),
            ("Ascent", Object::Integer(i64::from(self.ascender))),
            ("Descent", Object::Integer(i64::from(self.descender))),
            ("CapHeight", Object::Integer(i64::from(self.cap_height))),
            ("StemV", Object::Integer(80)),
            ("FontFile2", Object::Reference(font_file_id)),
        ]);

        doc.add_object(Object::Dictionary(dict))
    }

    fn create_cid_font(&self, doc: &mut Document, font_descriptor_id: ObjectId) -> ObjectId {
        let default_width = self.scale_width(self.glyph_width(self.glyph_id(' ')));

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
            ("BaseFont", Object::Name(self.base_font_name().into_bytes())),
            (
                "CIDSystemInfo",
                Object::Dictionary(Dictionary::from_iter([
                    ("Registry", Object::string_literal("Adobe")),
                    ("Ordering", Object::string_literal("Identity")),
                    ("Supplement", Object::Integer(0)),
                ])),
            ),
            ("FontDescriptor", Object::Reference(font_descriptor_id)),
            ("DW", Object::Integer(default_width)),
            ("W", Object::Array(self.build_widths_array())),
            ("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
        ]);

        doc.add_object(Object::Dictionary(dict))
    }

    /// The W array covers every glyph in the font as a single run:
    /// `[0 [w0 w1 w2 ...]]`.
    fn build_widths_array(&self) -> Vec<Object> {
        if self.advances.is_empty() {
            return Vec::new();
        }
        let widths = self
            .advances
            .iter()
            .map(|&w| Object::Integer(self.scale_width(w)))
            .collect();
        vec![Object::Integer(0), Object::Array(widths)]
    }

    fn create_type0_font(&self, doc: &mut Document, cid_font_id: ObjectId) -> ObjectId {
        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type0".to_vec())),
            ("BaseFont", Object::Name(self.base_font_name().into_bytes())),
            ("Encoding", Object::Name(b"Identity-H".to_vec())),
            ("DescendantFonts", Object::Array(vec![Object::Reference(cid_font_id)])),
        ]);

        doc.add_object(Object::Dictionary(dict))
    }

    /// Build a ToUnicode CMap for the glyphs that were actually drawn and
    /// link it from the Type0 font.
    pub fn attach_to_unicode(
        doc: &mut Document,
        type0_id: ObjectId,
        used: &BTreeMap<u16, char>,
    ) -> Result<()> {
        let cmap = to_unicode_cmap(used);
        let cmap_id = doc.add_object(Stream::new(Dictionary::new(), cmap.into_bytes()));

        let font = doc.get_object_mut(type0_id)?.as_dict_mut()?;
        font.set("ToUnicode", Object::Reference(cmap_id));
        Ok(())
    }
}

impl TextMeasure for EmbeddedFont {
    fn measure(&self, text: &str, size: f32) -> f32 {
        let units_per_em = f32::from(self.units_per_em.max(1));
        let total_units: u32 = text
            .chars()
            .map(|c| u32::from(self.glyph_width(self.glyph_id(c))))
            .sum();
        total_units as f32 * size / units_per_em
    }
}

/// `bfchar` blocks hold at most 100 entries each.
const BFCHAR_BLOCK: usize = 100;

fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );

    let entries: Vec<_> = used.iter().collect();
    for block in entries.chunks(BFCHAR_BLOCK) {
        let _ = writeln!(cmap, "{} beginbfchar", block.len());
        for (gid, c) in block {
            let mut units = [0u16; 2];
            let utf16 = c.encode_utf16(&mut units);
            let _ = write!(cmap, "<{gid:04X}> <");
            for unit in utf16.iter() {
                let _ = write!(cmap, "{unit:04X}");
            }
            cmap.push_str(">\n");
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end",
    );
    cmap
}
