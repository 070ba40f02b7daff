use std::fmt::Write as _;

use crate::recipe::HtmlElement;
use crate::util::sha256_hex;

/// Cache key for fetched and rendered resources.
///
/// Keys double as file names in the disk cache:
/// - fonts are keyed by family name, so a family is fetched once per cache
/// - images are keyed by SHA-256 of the URL plus the detected extension
/// - HTML fragments are keyed by SHA-256 of the full element definition, so
///   two elements sharing markup but not geometry never collide
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
}

impl CacheKey {
    pub fn font(family: &str) -> Self {
        Self {
            name: format!("{}.ttf", escape(family)),
        }
    }

    pub fn image(url: &str, extension: &str) -> Self {
        Self {
            name: format!("{}.{extension}", sha256_hex(url.as_bytes())),
        }
    }

    pub fn html(element: &HtmlElement) -> Self {
        // Serializing a struct is deterministic: fields are emitted in declaration order
        let definition = serde_json::to_vec(element).unwrap_or_default();
        Self {
            name: format!("{}.pdf", sha256_hex(&definition)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Keep a font family usable as a file name. Every byte outside
/// `[A-Za-z0-9 -]` becomes `%XX`, so distinct families never share a file.
fn escape(family: &str) -> String {
    let mut out = String::with_capacity(family.len());
    for byte in family.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b' ' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
