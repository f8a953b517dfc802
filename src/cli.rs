// src/cli.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::{
    config::{self, DEFAULT_CONFIG_DIR},
    extract,
    load::{Sink, WriteMode},
    logging,
    pipeline::{self, RunOptions},
    table,
};

#[derive(Parser, Debug)]
#[command(name = "data-loader")]
#[command(about = "Config-driven table loader with verified transformers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Output sink, overriding the configuration
        #[arg(long = "save-method", value_enum)]
        save_method: Option<Sink>,

        /// Write mode, overriding the configuration
        #[arg(long, value_enum)]
        mode: Option<WriteMode>,

        /// Validate and transform without writing
        #[arg(long)]
        dry_run: bool,

        /// Signature template for the transformer
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// List pipeline configurations
    List {
        #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
        dir: PathBuf,
    },
    /// Parse and validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Read a data file and print its first rows
    Read {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long, default_value = "10")]
        rows: usize,
    },
    /// Verify a pipeline's transformer against the template
    Check {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        template: Option<PathBuf>,

        /// Print the signature descriptor as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            save_method,
            mode,
            dry_run,
            template,
        } => {
            let config = config::load_pipeline_config(&config)?;
            let (_guard, log_file) =
                logging::init_with_file(&config.details.project_path.join("logs"))
                    .context("setting up logging")?;
            info!(log_file = %log_file.display(), "logging to file");
            let options = RunOptions {
                sink: save_method,
                mode,
                dry_run,
                template,
            };
            let summary = pipeline::run_pipeline(&config, &options)?;
            match &summary.destination {
                Some(dest) => println!(
                    "{}: wrote {} rows to {}",
                    summary.pipeline,
                    summary.rows,
                    dest.display()
                ),
                None => println!(
                    "{}: {} rows validated (dry run) with columns {}",
                    summary.pipeline,
                    summary.rows,
                    summary.columns.join(", ")
                ),
            }
        }
        Commands::List { dir } => {
            logging::init_console();
            let found = config::list_configs(&dir)?;
            if found.is_empty() {
                println!("no configurations in {}", dir.display());
            }
            for path in found {
                println!("{}", path.display());
            }
        }
        Commands::Validate { config } => {
            logging::init_console();
            let parsed = config::load_pipeline_config(&config)?;
            println!(
                "{}: ok ({} input(s) → {}.{})",
                config.display(),
                parsed.extract_files.len(),
                parsed.output.db,
                parsed.output.table_name
            );
        }
        Commands::Read { file, rows } => {
            logging::init_console();
            let kind = extract::detect_file_type(&file)?;
            let batch = extract::read_table(&file)?;
            println!("{} ({}, {} rows)", file.display(), kind, batch.num_rows());
            println!("{}", table::preview(&batch, rows)?);
        }
        Commands::Check {
            config,
            template,
            json,
        } => {
            logging::init_console();
            let config = config::load_pipeline_config(&config)?;
            let verified = pipeline::check_transformer(&config, template.as_ref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(verified.signature())?);
            } else {
                println!("{}: transform{}", verified.location(), verified.signature());
            }
        }
    }
    Ok(())
}
