mod color;
mod compositor;
mod document;
mod elements;
mod font;
mod image;
pub mod import;
pub mod layout;
mod page_index;

pub use color::Cmyk;
pub use compositor::{ComposeAssets, PageBuilder, PageCompositor};
pub use document::{ImportedPage, SourceDocument};
pub use font::EmbeddedFont;
pub use image::{ImageAsset, detect_format, extension};
pub use layout::{LinePlacement, Matrix, TextMeasure};
pub use page_index::PageIndex;
