use thiserror::Error;

/// Unified error type for pdf-compose-core
///
/// This enum encompasses all error cases that can occur while composing:
/// - Resource fetching (layers, fonts, images)
/// - Layout (fonts, colors)
/// - Layer merging and document construction
/// - HTML and raster collaborators
/// - Cache and configuration handling
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Fetch Errors
    // ==========================================================================
    /// A resource could not be fetched (non-success status or transport failure)
    #[error("could not fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A fetched resource is in a format the compositor cannot draw
    #[error("unsupported format for {url}: {reason}")]
    UnsupportedFormat { url: String, reason: String },

    // ==========================================================================
    // Recipe Errors
    // ==========================================================================
    /// The recipe JSON could not be parsed
    #[error("failed to parse recipe: {0}")]
    RecipeParse(String),

    /// The recipe is structurally invalid
    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    // ==========================================================================
    // Layout Errors
    // ==========================================================================
    /// A text element references a font family that was not loaded
    #[error("font family '{0}' is not loaded (declare it in the recipe fonts)")]
    FontNotLoaded(String),

    /// A font file could not be parsed
    #[error("failed to parse font '{family}': {reason}")]
    FontParse { family: String, reason: String },

    /// A color string is not a valid "c,m,y,k" value
    #[error("invalid CMYK color '{0}'")]
    InvalidColor(String),

    // ==========================================================================
    // Merge Errors
    // ==========================================================================
    /// Failed to open or parse a PDF
    #[error("failed to open PDF: {0}")]
    PdfOpen(String),

    /// A layer page could not be merged onto the output page
    #[error("failed to merge page {page} of layer {layer}: {reason}")]
    Merge {
        layer: usize,
        page: usize,
        reason: String,
    },

    // ==========================================================================
    // Engine Errors
    // ==========================================================================
    /// Document construction or writing failed
    #[error("document engine error: {0}")]
    Engine(String),

    /// Error from the lopdf library
    #[error("lopdf error: {0}")]
    Lopdf(String),

    /// Composition was abandoned because the output has no consumer left
    #[error("composition cancelled: output channel closed")]
    Cancelled,

    // ==========================================================================
    // Collaborator Errors
    // ==========================================================================
    /// The HTML renderer failed
    #[error("HTML render failed: {0}")]
    Render(String),

    /// No HTML renderer could be launched
    #[error("HTML renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The raster converter failed
    #[error("raster conversion failed: {0}")]
    Raster(String),

    // ==========================================================================
    // Cache Errors
    // ==========================================================================
    /// Failed to initialize the cache
    #[error("failed to initialize cache: {0}")]
    CacheInit(String),

    /// Failed to write to cache
    #[error("failed to write to cache: {0}")]
    CacheWrite(String),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The composition stage an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Recipe,
    Fetch,
    Layout,
    Merge,
    Render,
    Engine,
    Cache,
    Config,
    Io,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Recipe => "recipe",
            Self::Fetch => "fetch",
            Self::Layout => "layout",
            Self::Merge => "merge",
            Self::Render => "render",
            Self::Engine => "engine",
            Self::Cache => "cache",
            Self::Config => "config",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Which stage of composition produced this error.
    pub const fn stage(&self) -> Stage {
        match self {
            Self::RecipeParse(_) | Self::InvalidRecipe(_) => Stage::Recipe,
            Self::Fetch { .. } | Self::UnsupportedFormat { .. } => Stage::Fetch,
            Self::FontNotLoaded(_) | Self::FontParse { .. } | Self::InvalidColor(_) => {
                Stage::Layout
            }
            Self::PdfOpen(_) | Self::Merge { .. } => Stage::Merge,
            Self::Engine(_) | Self::Lopdf(_) | Self::Cancelled => Stage::Engine,
            Self::Render(_) | Self::RendererUnavailable(_) | Self::Raster(_) => Stage::Render,
            Self::CacheInit(_) | Self::CacheWrite(_) => Stage::Cache,
            Self::ConfigLoad(_) | Self::ConfigInvalid { .. } => Stage::Config,
            Self::Io(_) => Stage::Io,
        }
    }

    pub(crate) fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Self::Lopdf(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_mentions_url_and_cause() {
        let err = Error::fetch("https://example.com/a.pdf", "HTTP 404 Not Found");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/a.pdf"));
        assert!(msg.contains("404"));
        assert_eq!(err.stage(), Stage::Fetch);
    }

    #[test]
    fn test_stage_classification() {
        assert_eq!(Error::FontNotLoaded("Inter".into()).stage(), Stage::Layout);
        assert_eq!(
            Error::Merge { layer: 1, page: 3, reason: "missing".into() }.stage(),
            Stage::Merge
        );
        assert_eq!(Error::Render("boom".into()).stage(), Stage::Render);
        assert_eq!(Error::Cancelled.stage(), Stage::Engine);
        assert_eq!(Error::InvalidRecipe("no layers".into()).stage(), Stage::Recipe);
    }
}
