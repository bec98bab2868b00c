use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use iconsearch::embedder::SvgEmbedding;
use iconsearch::indexer::{RunOutcome, RunReport, DEFAULT_ICON_SIZE};
use iconsearch::manifest::{GitCheckout, ManifestSnapshot};
use iconsearch::version::DEFAULT_VERSION_FILE;
use iconsearch::{
    logging, ElasticStore, HttpEmbedder, HttpRenderer, Indexer, IndexerOptions, RunScope,
    ServiceArgs, VersionMarker,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "icon-indexer",
    about = "Render, embed, and index every icon of the latest upstream major release"
)]
struct IndexCli {
    /// Write documents to the search index (without this the run is a dry run)
    #[arg(long, default_value_t = false)]
    index: bool,

    /// Process only the first N matched icons
    #[arg(long)]
    limit: Option<usize>,

    /// Re-index even if the stored release is already complete
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Index plain icons only
    #[arg(long, default_value_t = false)]
    skip_tokens: bool,

    /// Directory receiving rendered PNGs as <release>/<icon>_<variant>.png
    #[arg(long, env = "ICONSEARCH_SAVE_IMAGES")]
    save_images: Option<PathBuf>,

    /// Renderer size for plain icons
    #[arg(long, default_value = DEFAULT_ICON_SIZE)]
    icon_size: String,

    /// Checkout location of the upstream repository
    #[arg(long, env = "EUI_LOCATION", default_value = "data/eui")]
    repo_dir: PathBuf,

    /// Upstream repository URL
    #[arg(long, env = "EUI_REPO", default_value = "https://github.com/elastic/eui.git")]
    repo_url: String,

    /// Icon registry path, relative to the checkout
    #[arg(long, default_value = "packages/eui/src/components/icon/icon_map.ts")]
    icon_map_path: PathBuf,

    /// Use an existing checkout at this release instead of fetching and checking out tags
    #[arg(long)]
    release_tag: Option<String>,

    /// File recording the last fully indexed release
    #[arg(long, env = "ICONSEARCH_VERSION_FILE", default_value = DEFAULT_VERSION_FILE)]
    version_file: PathBuf,

    /// Icons processed concurrently
    #[arg(long, env = "ICONSEARCH_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Skip steps whose embedding is already stored for this release
    #[arg(long, default_value_t = false)]
    incremental: bool,

    /// SVG embedding route: `local` rasterizes here, `service` posts markup to the embedder
    #[arg(long, default_value = "local")]
    svg_route: SvgEmbedding,

    /// Log at debug level
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<ExitCode> {
    let cli = IndexCli::parse();
    logging::init(cli.verbose);
    let config = cli.service.build_config()?;

    let release_tag = match &cli.release_tag {
        Some(tag) => tag.clone(),
        None => GitCheckout::new(&cli.repo_url, &cli.repo_dir)
            .prepare_latest()
            .context("failed to prepare upstream checkout")?,
    };
    let snapshot = ManifestSnapshot::load(&cli.repo_dir, &cli.icon_map_path, release_tag)?;
    anyhow::ensure!(
        !snapshot.icons().is_empty(),
        "no icons matched between the icon map and SVG files"
    );

    let renderer = HttpRenderer::from_config(&config)?;
    let embedder = HttpEmbedder::from_config(&config)?;
    let store = ElasticStore::from_config(&config)?;
    let options = IndexerOptions {
        scope: RunScope::from_include_tokens(!cli.skip_tokens),
        force: cli.force,
        write: cli.index,
        limit: cli.limit,
        icon_size: Some(cli.icon_size.clone()).filter(|size| !size.is_empty()),
        save_images: cli.save_images.clone(),
        incremental: cli.incremental,
        workers: cli.workers.max(1),
        svg_embedding: cli.svg_route,
    };
    if !options.write {
        info!("dry run: documents and the version marker will not be written");
    }
    let indexer = Indexer::new(&renderer, &embedder, &store, config.dimensions(), options);
    let marker = VersionMarker::new(&cli.version_file);
    let outcome = indexer
        .run(&snapshot, &marker)
        .context("indexing run failed")?;

    match &outcome {
        RunOutcome::Skipped { release_tag } => {
            println!("{release_tag} is already fully indexed; nothing to do (use --force to re-index)");
        }
        RunOutcome::Completed { report, recorded } => print_summary(report, *recorded),
    }
    Ok(ExitCode::from(outcome.exit_code()))
}

fn print_summary(report: &RunReport, recorded: bool) {
    println!("release:     {}", report.release_tag);
    println!("processed:   {}", report.outcomes.len());
    println!("successful:  {}", report.successful());
    println!("failed:      {}", report.failed());
    if report.wrote {
        println!("written:     {}", report.written());
        println!(
            "marker:      {}",
            if recorded { "updated" } else { "unchanged" }
        );
    } else {
        println!("written:     0 (dry run)");
    }
    for outcome in report.failures() {
        println!("  {}:", outcome.icon_name);
        for error in &outcome.errors {
            println!("    - {error}");
        }
    }
}
