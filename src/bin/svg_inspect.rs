use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use iconsearch::normalizer::Rasterized;
use iconsearch::{logging, NormalizationConfig, Normalizer};

#[derive(Parser, Debug)]
#[command(
    name = "svg-inspect",
    about = "Canonicalize and rasterize SVG files, reporting colour and luminance statistics"
)]
struct InspectCli {
    /// SVG files to inspect
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write `<stem>.png` and `<stem>.canonical.svg` here
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Edge length of the rasterized square
    #[arg(long, default_value_t = 224)]
    size: u32,

    /// Log at debug level
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = InspectCli::parse();
    logging::init(cli.verbose);
    let normalizer = Normalizer::new(NormalizationConfig {
        target_size: cli.size.max(1),
        ..NormalizationConfig::default()
    });
    if let Some(dir) = &cli.out_dir {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut suspicious = 0usize;
    for path in &cli.files {
        match inspect(&normalizer, path, cli.out_dir.as_deref()) {
            Ok(raster) => {
                let stats = raster.stats;
                let verdict = if stats.is_single_color() {
                    suspicious += 1;
                    "SINGLE COLOUR"
                } else {
                    "ok"
                };
                println!(
                    "{}: colours={} luma min={:.1} max={:.1} mean={:.1} [{verdict}]",
                    path.display(),
                    stats.unique_colors,
                    stats.min_luma,
                    stats.max_luma,
                    stats.mean_luma
                );
            }
            Err(err) => {
                suspicious += 1;
                println!("{}: FAILED {err:#}", path.display());
            }
        }
    }
    println!("{} inspected, {} suspicious", cli.files.len(), suspicious);
    Ok(if suspicious == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn inspect(normalizer: &Normalizer, path: &Path, out_dir: Option<&Path>) -> Result<Rasterized> {
    let markup =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let canonical = normalizer.canonicalize_svg(&markup)?;
    let raster = normalizer.rasterize_svg(&canonical)?;
    if let Some(dir) = out_dir {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("icon");
        fs::write(dir.join(format!("{stem}.canonical.svg")), &canonical)?;
        fs::write(dir.join(format!("{stem}.png")), raster.png()?)?;
    }
    Ok(raster)
}
