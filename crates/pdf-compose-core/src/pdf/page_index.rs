//! Page index newtype for conversion between zero-based recipe pages and
//! lopdf's one-based page numbers.

use std::fmt;

use crate::error::Error;

/// A zero-based page index, known to fit lopdf's `u32` page numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(u32);

impl PageIndex {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the index as usize for Rust collections and recipe page matching.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Get the 1-indexed page number for lopdf (which uses 1-based indexing).
    #[must_use]
    pub const fn as_lopdf_page_number(self) -> u32 {
        self.0.saturating_add(1)
    }

    /// Create a PageIndex for `page_num` if it is inside a document of `total_pages`.
    pub fn try_from_page_num(page_num: usize, total_pages: usize) -> Option<Self> {
        if page_num >= total_pages {
            return None;
        }
        u32::try_from(page_num).ok().map(Self)
    }
}

impl TryFrom<usize> for PageIndex {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| Error::Engine(format!("page index {value} out of range")))
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
