//! Raster images as PDF image XObjects.

use bytes::Bytes;
use image::{GenericImageView, ImageFormat};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};

/// A decoded-on-demand image ready to be embedded.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub url: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    data: Bytes,
}

/// File extension for the formats that can be drawn.
pub fn extension(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpg"),
        _ => None,
    }
}

/// Detect the format of fetched image bytes; only PNG and JPEG are accepted.
pub fn detect_format(url: &str, data: &[u8]) -> Result<ImageFormat> {
    let format = image::guess_format(data).map_err(|e| Error::UnsupportedFormat {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if extension(format).is_none() {
        return Err(Error::UnsupportedFormat {
            url: url.to_string(),
            reason: format!("{format:?} images are not supported (use PNG or JPEG)"),
        });
    }
    Ok(format)
}

impl ImageAsset {
    pub fn from_bytes(url: &str, data: Bytes) -> Result<Self> {
        let format = detect_format(url, &data)?;
        let (width, height) = image::ImageReader::with_format(std::io::Cursor::new(&data), format)
            .into_dimensions()
            .map_err(|e| Error::UnsupportedFormat {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            url: url.to_string(),
            format,
            width,
            height,
            data,
        })
    }

    /// Add the image to `doc`. JPEG data is embedded unchanged; anything else
    /// is decoded to RGB with its alpha channel as a soft mask.
    pub fn embed(&self, doc: &mut Document) -> Result<ObjectId> {
        if self.format == ImageFormat::Jpeg {
            return Ok(self.embed_jpeg(doc));
        }

        let decoded = image::load_from_memory_with_format(&self.data, self.format).map_err(|e| {
            Error::UnsupportedFormat {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        let (width, height) = decoded.dimensions();
        let rgba = decoded.to_rgba8();

        let pixels = (width as usize) * (height as usize);
        let mut rgb = Vec::with_capacity(pixels * 3);
        let mut alpha = Vec::with_capacity(pixels);
        let mut has_alpha = false;
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            has_alpha |= a != u8::MAX;
            rgb.extend_from_slice(&[r, g, b]);
            alpha.push(a);
        }

        let mut dict = image_dict(width, height, b"DeviceRGB");
        if has_alpha {
            let mask = Stream::new(image_dict(width, height, b"DeviceGray"), alpha);
            let mask_id = doc.add_object(mask);
            dict.set("SMask", Object::Reference(mask_id));
        }

        Ok(doc.add_object(Stream::new(dict, rgb)))
    }

    fn embed_jpeg(&self, doc: &mut Document) -> ObjectId {
        let header = JpegHeader::parse(&self.data).unwrap_or_default();
        let color_space: &[u8] = match header.components {
            1 => b"DeviceGray",
            4 => b"DeviceCMYK",
            _ => b"DeviceRGB",
        };

        let mut dict = image_dict(self.width, self.height, color_space);
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        // Adobe writes CMYK JPEGs with inverted samples
        if header.components == 4 && header.adobe {
            dict.set(
                "Decode",
                Object::Array([1, 0, 1, 0, 1, 0, 1, 0].into_iter().map(Object::Integer).collect()),
            );
        }
        let stream = Stream::new(dict, self.data.to_vec()).with_compression(false);
        doc.add_object(stream)
    }
}

/// What the PDF needs to know about a JPEG, read from its marker segments
/// without decoding the scan data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct JpegHeader {
    components: u8,
    adobe: bool,
}

impl JpegHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.get(..2)? != [0xFF, 0xD8] {
            return None;
        }

        let mut header = Self::default();
        let mut pos = 2;
        loop {
            if *data.get(pos)? != 0xFF {
                return None;
            }
            let marker = *data.get(pos + 1)?;
            match marker {
                // Fill bytes before a marker
                0xFF => {
                    pos += 1;
                    continue;
                }
                // Markers without a length
                0x01 | 0xD0..=0xD7 => {
                    pos += 2;
                    continue;
                }
                0xD9 | 0xDA => return None,
                _ => {}
            }

            let len = usize::from(u16::from_be_bytes([*data.get(pos + 2)?, *data.get(pos + 3)?]));
            let segment = data.get(pos + 4..pos + 2 + len.max(2))?;
            match marker {
                0xEE => header.adobe |= segment.starts_with(b"Adobe"),
                // Start of frame, any coding except DHT/JPG/DAC which share the range
                0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                    header.components = *segment.get(5)?;
                    return Some(header);
                }
                _ => {}
            }
            pos += 2 + len;
        }
    }
}

fn image_dict(width: u32, height: u32, color_space: &[u8]) -> Dictionary {
    Dictionary::from_iter([
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Image".to_vec())),
        ("Width", Object::Integer(i64::from(width))),
        ("Height", Object::Integer(i64::from(height))),
        ("ColorSpace", Object::Name(color_space.to_vec())),
        ("BitsPerComponent", Object::Integer(8)),
    ])
}
