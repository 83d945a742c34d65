use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use facetmap_core::provider::openai::OpenAiClient;
use facetmap_core::{Aggregate, Aggregator, TiktokenCounter, cache, discover_paper_folders};
use facetmap_ingest::GrobidClient;
use facetmap_reduce::{PlottersRenderer, reduce_and_plot};
use ndarray::Array2;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod output;
mod settings;

use output::ColorMode;
use settings::{ModelArgs, PathArgs, Paths};

/// Facet map - extract paper facets with a language model, embed them and
/// plot 2-D projections
#[derive(Parser, Debug)]
#[command(name = "facetmap", version, about, long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Read settings from this TOML file instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send PDFs to GROBID and write one text file per section
    Split {
        /// PDF files to process
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// GROBID request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Extract facets from every paper and cache their embeddings
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Reuse cached embeddings whose facet names match
        #[arg(long)]
        reuse_cache: bool,
    },

    /// Project the cached embeddings and write the plots
    Plot {
        /// Seed for the randomized projections
        #[arg(long)]
        seed: Option<u64>,

        /// TrueType font for plot titles and labels
        #[arg(long)]
        font: Option<PathBuf>,
    },

    /// Embed every paper, then plot the result
    Run {
        #[command(flatten)]
        model: ModelArgs,

        /// Reuse cached embeddings whose facet names match
        #[arg(long)]
        reuse_cache: bool,

        /// Seed for the randomized projections
        #[arg(long)]
        seed: Option<u64>,

        /// TrueType font for plot titles and labels
        #[arg(long)]
        font: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "facetmap=debug" } else { "facetmap=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = settings::load_config_file(cli.config.as_ref())?;
    let paths = settings::resolve_paths(&file, &cli.paths);
    let color = ColorMode(!cli.no_color);
    let env = |name: &str| std::env::var(name).ok();

    let clean = match cli.command {
        Command::Split { pdfs, timeout } => split(&pdfs, timeout, &paths, color).await?,
        Command::Embed { model, reuse_cache } => {
            let config = settings::resolve_config(&file, env, &model, None)?;
            let aggregate = embed(config, &paths, reuse_cache, color).await?;
            aggregate.failed().count() == 0
        }
        Command::Plot { seed, font } => {
            let config = settings::resolve_config(&file, env, &ModelArgs::default(), seed)?;
            let (matrix, labels) = cache::load_all(&paths.embeddings_dir).with_context(|| {
                format!(
                    "No usable embeddings under {}. Run `facetmap embed` first",
                    paths.embeddings_dir.display()
                )
            })?;
            println!(
                "Loaded {} facet vectors of dimension {} from {}",
                matrix.nrows(),
                matrix.ncols(),
                paths.embeddings_dir.display()
            );
            plot(&matrix, &labels, config.seed, font, &paths, color)?
        }
        Command::Run {
            model,
            reuse_cache,
            seed,
            font,
        } => {
            let config = settings::resolve_config(&file, env, &model, seed)?;
            let seed = config.seed;
            let aggregate = embed(config, &paths, reuse_cache, color).await?;
            let papers_ok = aggregate.failed().count() == 0;
            if aggregate.labels.is_empty() {
                println!("No paper produced embeddings; skipping plots.");
                false
            } else {
                println!();
                let plots_ok =
                    plot(&aggregate.matrix, &aggregate.labels, seed, font, &paths, color)?;
                papers_ok && plots_ok
            }
        }
    };

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn split(
    pdfs: &[PathBuf],
    timeout: Option<u64>,
    paths: &Paths,
    color: ColorMode,
) -> anyhow::Result<bool> {
    let client = GrobidClient::new(&paths.grobid_url, timeout.map(Duration::from_secs))?;
    let mut stdout = std::io::stdout();
    let mut clean = true;

    for pdf in pdfs {
        if !pdf.exists() {
            anyhow::bail!("File not found: {}", pdf.display());
        }
        let spinner = indicatif::ProgressBar::new_spinner();
        spinner.set_message(format!("GROBID: {}", pdf.display()));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let result = facetmap_ingest::split_pdf(&client, pdf, &paths.sections_root).await;

        spinner.finish_and_clear();
        clean &= result.is_ok();
        output::print_split_result(&mut stdout, pdf, &result, color)?;
    }
    Ok(clean)
}

async fn embed(
    config: facetmap_core::Config,
    paths: &Paths,
    reuse_cache: bool,
    color: ColorMode,
) -> anyhow::Result<Aggregate> {
    if !paths.sections_root.is_dir() {
        anyhow::bail!(
            "Sections folder not found: {}. Run `facetmap split` first",
            paths.sections_root.display()
        );
    }
    let folders = discover_paper_folders(&paths.sections_root)?;
    if folders.is_empty() {
        anyhow::bail!(
            "No *_sections folders under {}",
            paths.sections_root.display()
        );
    }
    tracing::debug!(?config, "resolved configuration");

    let client = Arc::new(OpenAiClient::from_config(&config).context("Provider setup failed")?);
    let counter = Arc::new(TiktokenCounter::for_config(&config)?);
    let aggregator = Aggregator::new(config, client.clone(), client, counter)
        .with_cache_dir(paths.embeddings_dir.clone())
        .reuse_cache(reuse_cache);

    let total = folders.len();
    let progress = output::ProgressWriter::new(std::io::stdout(), total, color);
    let aggregate = aggregator
        .aggregate(&folders, |event| progress.on_event(&event))
        .await;
    progress.finish().context("Failed to write progress")?;

    output::print_aggregate_summary(&mut std::io::stdout(), &aggregate, color)?;
    Ok(aggregate)
}

fn plot(
    matrix: &Array2<f64>,
    labels: &[String],
    seed: u64,
    font: Option<PathBuf>,
    paths: &Paths,
    color: ColorMode,
) -> anyhow::Result<bool> {
    let renderer = PlottersRenderer {
        font_path: font,
        ..PlottersRenderer::default()
    };
    let outcomes = reduce_and_plot(matrix, labels, &paths.plots_dir, seed, &renderer)?;
    output::print_plot_outcomes(&mut std::io::stdout(), &outcomes, color)?;
    Ok(outcomes.iter().all(|o| o.result.is_ok()))
}
