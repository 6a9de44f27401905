mod config;
mod dataset;
mod patch;
mod pipeline;
mod pr;
mod report;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// PR Corpus: CLI tool that takes a table of (pull request, test) rows and
/// collects each test file's post-change content, its patch, and the
/// pre-change original reconstructed by reversing the patch.
#[derive(Parser, Debug)]
#[command(name = "pr-corpus", version, about)]
struct Cli {
    /// GitHub access token (falls back to .pr-corpus.toml, then GITHUB_TOKEN)
    #[arg(short = 't', long)]
    github_access_token: Option<String>,

    /// Input CSV with pull request links and test identifiers
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the verified subset of the input table
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum simultaneous GitHub API requests
    #[arg(short, long)]
    semaphore: Option<usize>,

    /// Config file to use instead of ./.pr-corpus.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for the current/, original/ and patch/ areas
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Write the run report as markdown instead of printing it
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let _main_span = info_span!("pr_corpus", input = %cli.input.display()).entered();

    info!("loading configuration");
    let config = load_config(&cli)?;
    let token = config.github_token().ok_or(pr::PrError::MissingToken)?;
    debug!(
        max_in_flight = config.fetch.max_in_flight,
        out_dir = %config.output.root.display(),
        "configuration resolved"
    );

    info!("loading dataset");
    let dataset = dataset::Dataset::load(&cli.input, &config.dataset)?;
    if dataset.is_empty() {
        warn!(path = %cli.input.display(), "dataset has no rows");
    }
    let resolved = dataset.resolve_rows();
    info!(
        rows = dataset.len(),
        scheduled = resolved.rows.len(),
        unresolved = resolved.unresolved.len(),
        missing_url = resolved.missing_url,
        "resolved test files"
    );

    let client = pr::GitHubClient::new(token, &config.github.api_base_url, config.request_timeout())?;
    let mut pipeline = pipeline::Pipeline::new(Arc::new(client), &config);
    if !cli.no_progress {
        pipeline = pipeline.with_progress(progress_bar());
    }

    info!("retrieving pull request files");
    let outcome = pipeline.run(resolved.rows.clone()).await?;

    let written = dataset.write_subset_to(&outcome.verified, &config.output.verified)?;
    info!(rows = written, path = %config.output.verified.display(), "wrote verified subset");

    let built_report = report::build(dataset.len(), &resolved, &outcome);
    report::output(&built_report, cli.report.as_deref())?;
    info!(coverage = %built_report.coverage, "done");

    Ok(())
}

/// Config file first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<config::Config, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    if let Some(token) = &cli.github_access_token {
        config.github.token = Some(token.clone());
    }
    if let Some(limit) = cli.semaphore {
        config.fetch.max_in_flight = limit;
    }
    if let Some(out_dir) = &cli.out_dir {
        config.output.root = out_dir.clone();
    }
    if let Some(output) = &cli.output {
        config.output.verified = output.clone();
    }
    config.validate()?;
    Ok(config)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{wide_bar:.cyan/blue} {pos}/{len} pull requests")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
