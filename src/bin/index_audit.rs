use anyhow::{Context, Result};
use clap::Parser;
use iconsearch::completeness::field_coverage;
use iconsearch::version::DEFAULT_VERSION_FILE;
use iconsearch::{logging, ElasticStore, ServiceArgs, VersionMarker};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "index-audit",
    about = "Report how many documents of a release carry each embedding field"
)]
struct AuditCli {
    /// Release to audit (defaults to the release recorded in the version file)
    #[arg(long)]
    release_tag: Option<String>,

    /// File recording the last fully indexed release
    #[arg(long, env = "ICONSEARCH_VERSION_FILE", default_value = DEFAULT_VERSION_FILE)]
    version_file: PathBuf,

    /// Log at debug level
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    let cli = AuditCli::parse();
    logging::init(cli.verbose);
    let config = cli.service.build_config()?;
    let release_tag = match cli.release_tag {
        Some(tag) => tag,
        None => VersionMarker::new(&cli.version_file).read().with_context(|| {
            format!(
                "no --release-tag given and {} records no release",
                cli.version_file.display()
            )
        })?,
    };

    let store = ElasticStore::from_config(&config)?;
    let coverage = field_coverage(&store, &release_tag)
        .with_context(|| format!("failed to audit {release_tag}"))?;

    println!("release:   {}", coverage.release_tag);
    println!("documents: {}", coverage.documents);
    println!("{:<24} {:>8} {:>8}", "field", "present", "missing");
    for (field, present) in &coverage.fields {
        println!(
            "{:<24} {:>8} {:>8}",
            field.as_str(),
            present,
            coverage.missing(*field)
        );
    }
    Ok(())
}
