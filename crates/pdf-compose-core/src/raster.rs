//! Rasterizing composed documents to PNG with ImageMagick.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::RasterConfig;
use crate::error::{Error, Result};
use crate::sink::OutputStream;

/// Which pages end up in the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterMode {
    /// The selected page(s) rendered by `convert`
    #[default]
    Cover,
    /// The selected pages tiled two across by `montage`
    Montage,
}

/// Raster output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterOptions {
    pub mode: RasterMode,
    /// ImageMagick page selection such as `0` or `0-3`; defaults to the first page
    pub pages: Option<String>,
    pub colorspace: String,
    pub density: u32,
    pub alpha: String,
    pub quality: u32,
    /// ImageMagick geometry such as `800x`
    pub resize: Option<String>,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            mode: RasterMode::Cover,
            pages: None,
            colorspace: "sRGB".to_string(),
            density: 140,
            alpha: "remove".to_string(),
            quality: 90,
            resize: None,
        }
    }
}

impl RasterOptions {
    /// Command-line arguments: settings first, then stdin with the page
    /// selection, then PNG on stdout.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.mode == RasterMode::Montage {
            args.extend(["-mode", "Concatenate", "-tile", "2x"].map(String::from));
        }

        args.extend([
            "-colorspace".to_string(),
            self.colorspace.clone(),
            "-density".to_string(),
            self.density.to_string(),
            "-alpha".to_string(),
            self.alpha.clone(),
            "-quality".to_string(),
            self.quality.to_string(),
        ]);

        if let Some(resize) = &self.resize {
            args.push("-resize".to_string());
            args.push(resize.clone());
        }

        args.push(format!("-[{}]", self.pages.as_deref().unwrap_or("0")));
        args.push("png:-".to_string());
        args
    }
}

/// Trait for document-to-image backends
#[async_trait]
pub trait RasterConverter: Send + Sync {
    /// Consume a PDF byte stream and return PNG bytes.
    async fn convert(&self, input: OutputStream, options: &RasterOptions) -> Result<Bytes>;
}

/// Runs ImageMagick's `convert` or `montage`.
pub struct ImageMagick {
    config: RasterConfig,
}

impl ImageMagick {
    pub const fn new(config: RasterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RasterConverter for ImageMagick {
    async fn convert(&self, mut input: OutputStream, options: &RasterOptions) -> Result<Bytes> {
        let binary = match options.mode {
            RasterMode::Cover => &self.config.convert_binary,
            RasterMode::Montage => &self.config.montage_binary,
        };
        let args = options.args();
        debug!("Running {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Raster(format!("{}: {e}", binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Raster("stdin not captured".to_string()))?;

        // Feed stdin while stdout is drained, or a full pipe stalls both sides
        let feed = async move {
            while let Some(chunk) = input.next().await {
                let chunk = chunk.map_err(|e| Error::Raster(format!("input stream failed: {e}")))?;
                stdin.write_all(&chunk).await?;
            }
            stdin.shutdown().await?;
            Ok::<_, Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Raster(format!(
                "{} exited with {}: {}",
                binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        fed?;

        Ok(Bytes::from(output.stdout))
    }
}
