use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable memory cache
    #[serde(default = "default_true")]
    pub memory_enabled: bool,

    /// Memory cache budget in megabytes
    #[serde(default = "default_memory_max_mb")]
    pub memory_max_mb: u64,

    /// Memory cache TTL in seconds (0 = no expiry)
    #[serde(default)]
    pub memory_ttl_seconds: u64,

    /// Enable disk cache
    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    /// Disk cache directory (defaults to .cache/pdf-compose)
    pub disk_path: Option<PathBuf>,
}

const fn default_true() -> bool {
    true
}

const fn default_memory_max_mb() -> u64 {
    256
}

impl CacheConfig {
    /// The disk cache directory, falling back to the user cache directory.
    pub fn disk_dir(&self) -> PathBuf {
        self.disk_path
            .clone()
            .unwrap_or_else(crate::util::resource_cache_path)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            memory_max_mb: default_memory_max_mb(),
            memory_ttl_seconds: 0,
            disk_enabled: true,
            disk_path: None,
        }
    }
}

/// Resource fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_fetch_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("pdf-compose/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Headless browser used to render HTML elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Browser executable (looked up on PATH when not absolute)
    #[serde(default = "default_browser_binary")]
    pub binary: PathBuf,

    /// Extra command-line arguments passed on every launch
    #[serde(default = "default_browser_args")]
    pub extra_args: Vec<String>,

    /// Upper bound for a single render, in seconds
    #[serde(default = "default_render_timeout")]
    pub timeout_seconds: u64,
}

fn default_browser_binary() -> PathBuf {
    PathBuf::from("chromium")
}

fn default_browser_args() -> Vec<String> {
    vec![
        "--disable-web-security".to_string(),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
    ]
}

const fn default_render_timeout() -> u64 {
    60
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: default_browser_binary(),
            extra_args: default_browser_args(),
            timeout_seconds: default_render_timeout(),
        }
    }
}

/// ImageMagick executables used for raster output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "default_convert_binary")]
    pub convert_binary: PathBuf,

    #[serde(default = "default_montage_binary")]
    pub montage_binary: PathBuf,
}

fn default_convert_binary() -> PathBuf {
    PathBuf::from("convert")
}

fn default_montage_binary() -> PathBuf {
    PathBuf::from("montage")
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            convert_binary: default_convert_binary(),
            montage_binary: default_montage_binary(),
        }
    }
}

/// Output channel sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Bytes per chunk pushed into the output channel
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of chunks the channel holds before the writer blocks
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_chunk_size() -> usize {
    64 * 1024
}

const fn default_channel_capacity() -> usize {
    16
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Resource cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Resource fetching configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// HTML renderer configuration
    #[serde(default)]
    pub renderer: RendererConfig,

    /// Raster converter configuration
    #[serde(default)]
    pub raster: RasterConfig,

    /// Output channel configuration
    #[serde(default)]
    pub output: OutputConfig,
}

impl ComposeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::Error::ConfigLoad(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations (~/.config/pdf-compose/config.toml, ./config.toml)
    pub fn load() -> Self {
        // Try user config
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("pdf-compose").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // Try local config
        let local_config = std::path::PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./config.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./config.toml: {}", e);
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    /// Reject values the compositor cannot work with.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.output.chunk_size == 0 {
            return Err(crate::error::Error::ConfigInvalid {
                field: "output.chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.output.channel_capacity == 0 {
            return Err(crate::error::Error::ConfigInvalid {
                field: "output.channel_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ComposeConfig::default();
        assert!(config.cache.memory_enabled);
        assert!(config.cache.disk_enabled);
        assert_eq!(config.output.chunk_size, 64 * 1024);
        assert_eq!(config.renderer.binary, PathBuf::from("chromium"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ComposeConfig = toml::from_str(
            r#"
            [cache]
            disk_enabled = false

            [renderer]
            binary = "/usr/bin/google-chrome"
            "#,
        )
        .unwrap();

        assert!(!config.cache.disk_enabled);
        assert!(config.cache.memory_enabled);
        assert_eq!(config.renderer.binary, PathBuf::from("/usr/bin/google-chrome"));
        assert_eq!(config.renderer.timeout_seconds, 60);
        assert_eq!(config.raster.montage_binary, PathBuf::from("montage"));
    }

    #[test]
    fn test_disk_dir_prefers_configured_path() {
        let config: ComposeConfig = toml::from_str(
            r#"
[cache]
disk_path = "/srv/compose-cache"
"#,
        )
        .unwrap();
        assert_eq!(config.cache.disk_dir(), PathBuf::from("/srv/compose-cache"));

        let default = CacheConfig::default();
        assert_eq!(default.disk_dir(), crate::util::resource_cache_path());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = ComposeConfig::default();
        config.output.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
