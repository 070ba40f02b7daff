//! PDF Compose CLI - Command line tool for composing PDF documents from recipes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_compose_core::{
    ComposeConfig, ImageMagick, PdfBuilder, ProgressCallback, RasterMode, RasterOptions, Recipe,
    ScreenshotOptions,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// The composed PDF, streamed as it is written
    Pdf,
    /// A PNG of the selected page(s)
    Cover,
    /// A PNG of the selected pages tiled two across
    Montage,
}

#[derive(Parser, Debug)]
#[command(name = "pdf-compose")]
#[command(author, version, about = "Compose PDF documents from JSON recipes", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable caching
    #[arg(long, global = true)]
    no_cache: bool,

    /// Browser executable used to render HTML elements
    #[arg(long, global = true, env = "PDF_COMPOSE_BROWSER")]
    browser: Option<PathBuf>,

    /// Fetch and render timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Overall time limit for a compose run, in seconds
    #[arg(long, global = true, default_value_t = 300)]
    deadline: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a recipe into a PDF or PNG
    Compose {
        /// Recipe JSON file ("-" for stdin)
        recipe: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pdf")]
        format: OutputFormat,

        /// Pages to rasterize, zero-based (e.g., "0" or "0-3")
        #[arg(long)]
        pages: Option<String>,

        /// Raster density in DPI
        #[arg(long, default_value_t = 140)]
        density: u32,

        /// Raster quality
        #[arg(long, default_value_t = 90)]
        quality: u32,

        /// Raster resize geometry (e.g., "800x")
        #[arg(long)]
        resize: Option<String>,

        /// Raster colorspace
        #[arg(long, default_value = "sRGB")]
        colorspace: String,
    },

    /// Render an HTML file to PNG
    Screenshot {
        /// HTML file ("-" for stdin)
        html: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 1280)]
        width: u32,

        #[arg(long, default_value_t = 800)]
        height: u32,
    },

    /// Remove every cached resource
    ClearCache,
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    if path == Path::new("-") {
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read stdin")?;
    } else {
        let mut file = tokio::fs::File::open(path)
            .await
            .context(format!("Failed to open {}", path.display()))?;
        file.read_to_end(&mut data).await?;
    }
    Ok(data)
}

async fn open_output(path: Option<&Path>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .context(format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    })
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    // Template is hardcoded and valid, unwrap is safe
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressCallback {
    let pb = pb.clone();
    Box::new(move |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })
}

async fn compose_pdf(
    builder: &PdfBuilder,
    recipe: Recipe,
    output: Option<&Path>,
    pb: &ProgressBar,
) -> Result<()> {
    let mut out = open_output(output).await?;
    let (mut stream, handle) = builder.compose_stream(recipe, Some(progress_callback(pb)));

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => out.write_all(&chunk).await.context("Failed to write output")?,
            // The handle carries the typed error
            Err(_) => break,
        }
    }
    out.flush().await?;

    let summary = handle.await.context("Compose task panicked")??;
    pb.finish_and_clear();
    info!(
        "Composed {} pages from {} layers ({} elements, {} bytes)",
        summary.pages, summary.layers, summary.elements_drawn, summary.bytes_written
    );
    Ok(())
}

async fn write_all(output: Option<&Path>, data: &[u8]) -> Result<()> {
    let mut out = open_output(output).await?;
    out.write_all(data).await.context("Failed to write output")?;
    out.flush().await?;
    Ok(())
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    let mut s = String::new();
    reader.read_to_string(&mut s).await?;
    Ok(s)
}

async fn compose(
    builder: &PdfBuilder,
    recipe: Recipe,
    output: Option<&Path>,
    format: OutputFormat,
    raster: RasterOptions,
) -> Result<()> {
    let pb = progress_bar();

    let mode = match format {
        OutputFormat::Pdf => return compose_pdf(builder, recipe, output, &pb).await,
        OutputFormat::Cover => RasterMode::Cover,
        OutputFormat::Montage => RasterMode::Montage,
    };
    let options = RasterOptions { mode, ..raster };

    let converter = ImageMagick::new(builder.config().raster.clone());
    let (png, summary) = builder
        .rasterize(recipe, &converter, &options, Some(progress_callback(&pb)))
        .await
        .context("Failed to rasterize composed document")?;
    pb.finish_and_clear();

    info!("Rasterized {} pages into {} bytes", summary.pages, png.len());
    write_all(output, &png).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load or create config
    let mut config = if let Some(config_path) = &args.config {
        ComposeConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        ComposeConfig::load()
    };

    // Override config with CLI arguments
    if args.no_cache {
        config.cache.memory_enabled = false;
        config.cache.disk_enabled = false;
    }
    if let Some(browser) = args.browser {
        config.renderer.binary = browser;
    }
    if let Some(timeout) = args.timeout {
        config.fetch.timeout_seconds = timeout;
        config.renderer.timeout_seconds = timeout;
    }

    match args.command {
        Command::ClearCache => {
            let dir = config.cache.disk_dir();
            let removed = pdf_compose_core::clear_resource_cache(&dir)
                .context(format!("Failed to clear resource cache {}", dir.display()))?;

            // CLI output is intentional
            #[allow(clippy::print_stdout)]
            {
                println!("Removed {removed} cached resources");
            }
        }

        Command::Screenshot {
            html,
            output,
            width,
            height,
        } => {
            let html = if html == Path::new("-") {
                read_to_string(tokio::io::stdin()).await?
            } else {
                tokio::fs::read_to_string(&html)
                    .await
                    .context(format!("Failed to read {}", html.display()))?
            };

            let builder = PdfBuilder::new(config).context("Failed to initialize compositor")?;
            let png = builder
                .screenshot(&html, &ScreenshotOptions { width, height })
                .await
                .context("Failed to render screenshot")?;
            write_all(output.as_deref(), &png).await?;
        }

        Command::Compose {
            recipe,
            output,
            format,
            pages,
            density,
            quality,
            resize,
            colorspace,
        } => {
            info!("Loading recipe: {}", recipe.display());
            let json = read_input(&recipe).await?;
            let recipe = Recipe::from_json(&json)
                .context(format!("Invalid recipe: {}", recipe.display()))?;

            let raster = RasterOptions {
                pages,
                colorspace,
                density,
                quality,
                resize,
                ..RasterOptions::default()
            };

            let builder = PdfBuilder::new(config).context("Failed to initialize compositor")?;
            let run = compose(&builder, recipe, output.as_deref(), format, raster);
            tokio::time::timeout(Duration::from_secs(args.deadline), run)
                .await
                .context(format!("Compose did not finish within {} seconds", args.deadline))??;
        }
    }

    Ok(())
}
