use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::{HtmlRenderer, PdfRenderOptions, RendererFactory, ScreenshotOptions};
use crate::config::RendererConfig;
use crate::error::{Error, Result};

/// Upper bound for the `--version` health check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Renders HTML with a headless Chromium-family browser binary.
pub struct ChromiumRenderer {
    config: RendererConfig,
}

impl ChromiumRenderer {
    pub const fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Prefix `html` with an `@page` rule matching the requested geometry.
    fn with_page_size(html: &str, options: &PdfRenderOptions) -> String {
        let background = if options.print_background {
            "-webkit-print-color-adjust:exact;print-color-adjust:exact;"
        } else {
            ""
        };
        format!(
            "<style>@page{{size:{}pt {}pt;margin:0}}html,body{{margin:0;padding:0;{background}}}</style>{html}",
            options.page_width, options.page_height
        )
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--headless")
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the browser against `input`, then read `output`.
    async fn run(&self, mut cmd: Command, input: &Path, output: &Path) -> Result<Bytes> {
        cmd.arg(format!("file://{}", input.display()));

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let result = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| Error::Render(format!("renderer timed out after {}s", timeout.as_secs())))?
            .map_err(|e| {
                Error::RendererUnavailable(format!("{}: {e}", self.config.binary.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Render(format!(
                "{} exited with {}: {}",
                self.config.binary.display(),
                result.status,
                stderr.trim()
            )));
        }

        let data = tokio::fs::read(output)
            .await
            .map_err(|e| Error::Render(format!("renderer produced no output: {e}")))?;
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl HtmlRenderer for ChromiumRenderer {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn render_pdf(&self, html: &str, options: &PdfRenderOptions) -> Result<Bytes> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("fragment.html");
        let output = dir.path().join("fragment.pdf");
        tokio::fs::write(&input, Self::with_page_size(html, options)).await?;

        debug!(
            "Rendering HTML fragment at {}x{}pt",
            options.page_width, options.page_height
        );

        let mut cmd = self.command();
        cmd.arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()));
        self.run(cmd, &input, &output).await
    }

    async fn screenshot(&self, html: &str, options: &ScreenshotOptions) -> Result<Bytes> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("page.html");
        let output = dir.path().join("page.png");
        tokio::fs::write(&input, html).await?;

        debug!("Screenshot at {}x{}", options.width, options.height);

        let mut cmd = self.command();
        cmd.arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", options.width, options.height))
            .arg(format!("--screenshot={}", output.display()));
        self.run(cmd, &input, &output).await
    }

    async fn health_check(&self) -> bool {
        let version = Command::new(&self.config.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, version).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!("Renderer health check failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Renderer health check timed out");
                false
            }
        }
    }
}

/// Launches [`ChromiumRenderer`]s, refusing when the binary does not answer.
pub struct ChromiumFactory {
    config: RendererConfig,
}

impl ChromiumFactory {
    pub const fn new(config: RendererConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RendererFactory for ChromiumFactory {
    async fn launch(&self) -> Result<Arc<dyn HtmlRenderer>> {
        let renderer = ChromiumRenderer::new(self.config.clone());
        if !renderer.health_check().await {
            return Err(Error::RendererUnavailable(format!(
                "{} --version did not succeed",
                self.config.binary.display()
            )));
        }
        Ok(Arc::new(renderer))
    }
}
