use anyhow::Result;
use clap::Parser;
use iconsearch::store::index_mapping;
use iconsearch::{logging, ElasticStore, ServiceArgs};

#[derive(Parser, Debug)]
#[command(
    name = "index-setup",
    about = "Create the icon index with its keyword, dense-vector, and sparse-vector mappings"
)]
struct SetupCli {
    /// Delete the index first if it already exists
    #[arg(long, default_value_t = false)]
    recreate: bool,

    /// Print the mapping instead of sending it
    #[arg(long, default_value_t = false)]
    print: bool,

    /// Log at debug level
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    let cli = SetupCli::parse();
    logging::init(cli.verbose);
    let config = cli.service.build_config()?;
    let mapping = index_mapping(config.dimensions());
    if cli.print {
        println!("{}", serde_json::to_string_pretty(&mapping)?);
        return Ok(());
    }

    let store = ElasticStore::from_config(&config)?;
    if store.index_exists()? {
        if !cli.recreate {
            println!("index '{}' already exists (use --recreate to rebuild it)", store.index());
            return Ok(());
        }
        store.delete_index()?;
    }
    store.create_index(&mapping)?;
    println!(
        "created index '{}' (image dims {}, text dims {})",
        store.index(),
        config.dimensions().image,
        config.dimensions().text
    );
    Ok(())
}
