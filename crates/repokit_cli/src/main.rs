//! Command-line smoke tool for the repository layer.
//!
//! # Responsibility
//! - Verify core linkage (`ping`).
//! - Print the built storage model (`schema`).
//! - Exercise a store end to end with throwaway rows (`smoke`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use repokit_core::{
    core_version, entity, init_logging, ping, Criteria, Model, SessionFactory, StoreConfig,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "repokit")]
#[command(about = "Generic repository / unit-of-work toolkit smoke tool")]
struct Args {
    /// JSON store configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print core version information
    Ping,
    /// Print every mapped table with its column types
    Schema,
    /// Create the schema, write sample rows and count them back
    Smoke {
        /// Number of sample rows to write
        #[arg(long, default_value_t = 3)]
        rows: u32,
    },
}

#[derive(Debug, Clone, Default)]
struct Product {
    id: Uuid,
    name: String,
    price: Decimal,
    discontinued: bool,
}

entity! {
    Product in "products" {
        key: id,
        fields: { id: Uuid, name: String, price: Decimal, discontinued: bool },
    }
}

fn sample_model() -> Result<Model> {
    Model::builder()
        .entity::<Product>()
        .build()
        .context("failed to build sample model")
}

fn load_config(args: &Args) -> Result<StoreConfig> {
    let config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut config = config.with_env_overrides().context("invalid REPOKIT_* override")?;
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

fn run_smoke(config: StoreConfig, rows: u32) -> Result<()> {
    let factory = SessionFactory::new(config, sample_model()?)?;
    let unit = factory.unit_of_work()?;
    let products = unit.repository::<Product>()?;

    let batch = Uuid::new_v4().simple().to_string();
    for index in 0..rows {
        products.add(&Product {
            id: Uuid::new_v4(),
            name: format!("smoke-{batch}-{index}"),
            price: Decimal::new(i64::from(index) * 1_250 + 999, 3),
            discontinued: false,
        })?;
    }
    let written = unit.save()?;
    let counted = products.count_where(Criteria::field("name").starts_with(&format!("smoke-{batch}-")))?;

    info!("event=smoke module=cli status=ok written={written} counted={counted}");
    println!("repokit smoke written={written} counted={counted}");
    anyhow::ensure!(
        counted == rows as usize,
        "expected {rows} rows, counted {counted}"
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    if config.logging.directory.is_some() {
        init_logging(&config.logging).context("failed to initialize logging")?;
    }

    match args.command {
        Command::Ping => {
            println!("repokit_core ping={}", ping());
            println!("repokit_core version={}", core_version());
        }
        Command::Schema => {
            for entity in sample_model()?.entities() {
                println!("{} ({})", entity.table, entity.type_name);
                for column in &entity.columns {
                    let null = if column.nullable { "NULL" } else { "NOT NULL" };
                    println!("  {} {} {}", column.name, column.column_type, null);
                }
            }
        }
        Command::Smoke { rows } => run_smoke(config, rows)?,
    }
    Ok(())
}
