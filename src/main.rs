use anyhow::Result;
use clap::{Parser, Subcommand};
use landsat_bq::bigquery::{self, BigQueryClient, LoadUpload};
use landsat_bq::catalog::Catalog;
use landsat_bq::config::{Config, DEFAULT_CONFIG_PATH};
use landsat_bq::cost_guard::{
    self, CostGuard, FixedAnswer, Prompter, TerminalPrompter, CANCELLED_MESSAGE,
};
use landsat_bq::error::ConfigError;
use landsat_bq::export::{self, NdjsonWriter};
use landsat_bq::report::Reporter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Export Landsat scene centroids to BigQuery and report on them.
#[derive(Parser, Debug)]
#[command(name = "landsat-bq", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a load job with every Landsat scene centroid. Does not wait for it to finish.
    Export {
        /// Also write the exported rows to this newline-delimited JSON file
        #[arg(long)]
        ndjson: Option<PathBuf>,
    },
    /// Run the reporting queries and write figures to the output directory
    Report {
        /// Ask for confirmation when a query's estimated cost (USD) exceeds this
        #[arg(long)]
        threshold: Option<f64>,
        /// Answer yes to every cost confirmation
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the state of a submitted job
    Status {
        job_id: String,
        #[arg(long)]
        location: Option<String>,
    },
}

fn bigquery_client(config: &Config) -> Result<BigQueryClient> {
    config.validate()?;
    let token = config
        .access_token
        .as_deref()
        .ok_or(ConfigError::MissingRequired("access_token"))?;
    BigQueryClient::new(&config.bigquery_url, &config.project, token)
}

async fn export_scenes(
    config: &Config,
    client: &BigQueryClient,
    ndjson: Option<&Path>,
) -> Result<()> {
    let table = config.table_id()?;
    let catalog = Catalog::new(
        &config.catalog_url,
        &config.catalog_collection,
        config.catalog_page_size,
    );
    let mut upload = LoadUpload::new(&table);
    let mut file = ndjson.map(NdjsonWriter::create).transpose()?;

    let rows = export::collect_landsat_missions(&catalog, |row| {
        let line = export::to_ndjson_line(row)?;
        if let Some(file) = file.as_mut() {
            file.write_line(&line)?;
        }
        upload.push_line(&line);
        Ok(())
    })
    .await?;
    if let (Some(file), Some(path)) = (file, ndjson) {
        file.finish()?;
        println!("Wrote {} rows to {}.", rows, path.display());
    }

    let job = client.submit_load(upload).await?;
    println!("Export task {} started for {} rows.", job.job_id, rows);
    println!("Check the status at {}.", bigquery::console_url(&job));
    Ok(())
}

async fn report(config: &Config, client: BigQueryClient, prompter: impl Prompter) -> Result<()> {
    let guard = CostGuard::new(client, prompter)
        .with_price_per_tib(config.price_per_tib)
        .with_warning_threshold(config.warning_threshold);
    let mut reporter = Reporter::new(guard, config.table_id()?, &config.output_dir);
    reporter.run_all().await
}

async fn run(command: Command, mut config: Config) -> Result<()> {
    let client = bigquery_client(&config)?;
    match command {
        Command::Export { ndjson } => {
            export_scenes(&config, &client, ndjson.as_deref()).await?;
        }
        Command::Report {
            threshold,
            yes,
            output_dir,
        } => {
            if let Some(threshold) = threshold {
                config.warning_threshold = threshold;
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            if yes {
                report(&config, client, FixedAnswer::yes()).await?;
            } else {
                report(&config, client, TerminalPrompter).await?;
            }
        }
        Command::Status { job_id, location } => {
            let state = client.job_state(&job_id, location.as_deref()).await?;
            println!("{}: {:?}", job_id, state);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    if cost_guard::accept_cancellation(run(cli.command, config).await)?.is_none() {
        println!("{}", CANCELLED_MESSAGE);
    }
    Ok(())
}
