use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use icon_map::{DuplicateFilename, IconMap, IconMapEntry};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "icon_map",
    version,
    about = "Print the typeToPathMap icon registry as JSON",
    long_about = "Reads the TypeScript file declaring `typeToPathMap` and prints every \
                  icon-to-filename entry plus the filenames claimed by more than one icon."
)]
struct MapCli {
    /// Registry source file; `-` or no argument reads stdin
    registry: Option<PathBuf>,

    /// Exit with status 3 when any filename is claimed by several icons
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Print single-line JSON
    #[arg(long, default_value_t = false)]
    compact: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    entries: &'a [IconMapEntry],
    duplicates: &'a [DuplicateFilename],
}

fn main() -> Result<ExitCode> {
    let cli = MapCli::parse();
    let source = read_registry(cli.registry.as_deref())?;
    let map = icon_map::parse_icon_map(&source)?;
    let duplicates = map.by_filename().duplicates;
    for duplicate in &duplicates {
        eprintln!(
            "warning: filename '{}' claimed by '{}' and '{}'; keeping '{}'",
            duplicate.filename, duplicate.dropped, duplicate.kept, duplicate.kept
        );
    }
    print_report(&map, &duplicates, cli.compact)?;

    if cli.strict && !duplicates.is_empty() {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

fn read_registry(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("failed to read registry from stdin")?;
            Ok(source)
        }
    }
}

fn print_report(map: &IconMap, duplicates: &[DuplicateFilename], compact: bool) -> Result<()> {
    let report = Report {
        entries: map.entries(),
        duplicates,
    };
    let json = if compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to serialize registry report")?;
    println!("{json}");
    Ok(())
}
