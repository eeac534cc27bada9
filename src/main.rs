use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use skycat::schema::DeclaredSchema;
use skycat::{Catalog, CatalogConfig};

#[derive(Parser)]
#[command(name = "skycat")]
#[command(about = "Uniform quantity access to simulation catalogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a catalog configuration
    Validate {
        /// Path to catalog YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the quantities a catalog exposes
    Quantities {
        /// Path to catalog YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Root directory for relative data paths
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// List native column names instead of homogenized quantities
        #[arg(long)]
        native: bool,
    },
    /// Show metadata for one quantity
    Info {
        /// Path to catalog YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Root directory for relative data paths
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// Quantity name
        #[arg(short, long)]
        quantity: String,
    },
    /// Generate the declared-schema file from the catalog's data files
    Schema {
        /// Path to catalog YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// Root directory for relative data paths
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// Replace an existing schema file (the old one is kept as .bak)
        #[arg(long)]
        overwrite: bool,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            CatalogConfig::from_yaml_file(&config)
                .with_context(|| format!("invalid catalog config {}", config.display()))?;
            println!("✓ Catalog configuration is valid");
        }
        Commands::Quantities {
            config,
            root_dir,
            native,
        } => {
            let catalog = load_catalog(&config, root_dir.as_deref())?;
            let names = if native {
                catalog.list_all_native_quantities()
            } else {
                catalog.list_all_quantities()
            };
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Info {
            config,
            root_dir,
            quantity,
        } => {
            let catalog = load_catalog(&config, root_dir.as_deref())?;
            if !catalog.has_quantity(&quantity) {
                anyhow::bail!("quantity '{}' is not in this catalog", quantity);
            }
            match catalog.get_quantity_info(&quantity) {
                Some(info) => {
                    println!("{}: {}", quantity, info.description);
                    if let Some(unit) = &info.unit {
                        println!("unit: {}", unit);
                    }
                }
                None => println!("{}: no metadata available", quantity),
            }
        }
        Commands::Schema {
            config,
            root_dir,
            overwrite,
        } => {
            let parsed = CatalogConfig::from_yaml_file(&config)
                .with_context(|| format!("invalid catalog config {}", config.display()))?;
            let path = parsed
                .schema_path(root_dir.as_deref())
                .context("this catalog family has no schema file")?;
            let catalog = parsed
                .build(root_dir.as_deref())
                .with_context(|| format!("cannot open catalog {}", config.display()))?;
            let schema = DeclaredSchema::from_native_schema(catalog.native_schema());
            schema.save_yaml(&path, overwrite)?;
            println!("✓ Wrote {}", path.display());
        }
        Commands::Version => {
            println!("skycat version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_catalog(config: &Path, root_dir: Option<&Path>) -> anyhow::Result<Catalog> {
    let parsed = CatalogConfig::from_yaml_file(config)
        .with_context(|| format!("invalid catalog config {}", config.display()))?;
    parsed
        .build(root_dir)
        .with_context(|| format!("cannot open catalog {}", config.display()))
}
