use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use fx_layers::config::{resolve_config, Config, ResolvedConfig};
use fx_layers::layers::{format_date, parse_date, GoldRow, Layer};
use fx_layers::output::csv::gold_to_csv;
use fx_layers::output::json::render_json;
use fx_layers::output::table::{render_gold_table, render_partitions_table, render_run_table};
use fx_layers::pipeline::PipelineOrchestrator;
use fx_layers::server::run_server;
use fx_layers::source::http::HttpRateSource;
use fx_layers::storage::{FsStore, PartitionStore};
use fx_layers::summary::openai::OpenAiSummaryGenerator;
use fx_layers::summary::{latest_report, load_gold, SummaryGenerator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(name = "fx-layers", about = "Daily FX rates: raw, silver, gold and summary layers")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, transform, enrich and summarize one date.
    Run {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        skip_summary: bool,
    },
    Fetch {
        #[arg(long)]
        date: Option<String>,
    },
    Transform {
        #[arg(long)]
        date: Option<String>,
    },
    Enrich {
        #[arg(long)]
        date: Option<String>,
    },
    Summarize {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Print a gold partition (latest when no date is given) and its report.
    Show {
        #[arg(long)]
        date: Option<String>,
    },
    Dates,
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3001)]
        port: u16,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    if let Commands::Config { init: true, .. } = &cli.command {
        Config::write_template(&config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }

    let config = load_config(&config_path)?;
    let store = FsStore::new(config.data_dir.clone());
    let today = Local::now().date_naive();

    match &cli.command {
        Commands::Run {
            date,
            top_n,
            skip_summary,
        } => {
            let date = resolve_date(date.as_deref(), today)?;
            let source = HttpRateSource::new(&config)?;
            let summarizer = if *skip_summary || !config.summary.enabled {
                None
            } else {
                Some(OpenAiSummaryGenerator::new(&config.summary)?)
            };
            let orchestrator = PipelineOrchestrator::new(&config, &store, today)
                .with_source(&source)
                .with_summarizer(summarizer.as_ref().map(|g| g as &dyn SummaryGenerator));
            let run = orchestrator
                .run(date, top_n.unwrap_or(config.summary.top_n))
                .await?;
            match cli.output {
                OutputFormat::Json => println!("{}", render_json(&run)?),
                _ => println!("{}", render_run_table(&run)),
            }
        }
        Commands::Fetch { date } => {
            let date = resolve_date(date.as_deref(), today)?;
            let source = HttpRateSource::new(&config)?;
            let orchestrator = PipelineOrchestrator::new(&config, &store, today).with_source(&source);
            let outcome = orchestrator.fetch(date).await?;
            print_outcome(&outcome, &outcome.location, cli.output)?;
        }
        Commands::Transform { date } => {
            let date = resolve_date(date.as_deref(), today)?;
            let orchestrator = PipelineOrchestrator::new(&config, &store, today);
            let outcome = orchestrator.transform(date)?;
            print_outcome(&outcome, &outcome.location, cli.output)?;
        }
        Commands::Enrich { date } => {
            let date = resolve_date(date.as_deref(), today)?;
            let orchestrator = PipelineOrchestrator::new(&config, &store, today);
            let outcome = orchestrator.enrich(date)?;
            print_outcome(&outcome, &outcome.location, cli.output)?;
        }
        Commands::Summarize { date, top_n } => {
            let date = resolve_date(date.as_deref(), today)?;
            let generator = OpenAiSummaryGenerator::new(&config.summary)?;
            let orchestrator =
                PipelineOrchestrator::new(&config, &store, today).with_summarizer(Some(&generator));
            let outcome = orchestrator
                .summarize(date, top_n.unwrap_or(config.summary.top_n))
                .await?;
            print_outcome(&outcome, &outcome.location, cli.output)?;
        }
        Commands::Show { date } => {
            let date = match date.as_deref() {
                Some(raw) => parse_date(raw)?,
                None => latest_gold_date(&store)?
                    .ok_or_else(|| anyhow!("no gold partitions under {}", store.root().display()))?,
            };
            let rows = load_gold(&store, date)?;
            print_gold(&rows, cli.output)?;
            if matches!(cli.output, OutputFormat::Table) {
                if let Some((key, text)) = latest_report(&store, Some(date))? {
                    println!("\n{}\n{text}", key.relative_path());
                }
            }
        }
        Commands::Dates => {
            let keys = store.list(Layer::Gold)?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_partitions_table(&keys)),
                OutputFormat::Json => {
                    let dates = keys
                        .iter()
                        .filter_map(|k| k.date())
                        .map(format_date)
                        .collect::<Vec<_>>();
                    println!("{}", render_json(&dates)?);
                }
                OutputFormat::Csv => {
                    println!("date");
                    for date in keys.iter().filter_map(|k| k.date()) {
                        println!("{}", format_date(date));
                    }
                }
            }
        }
        Commands::Serve { host, port } => {
            let bind = format!("{host}:{port}");
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
            run_server(Arc::new(store), addr).await?;
        }
        Commands::Config { init, show } => {
            if *show || !*init {
                println!("{}", render_json(&config)?);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ResolvedConfig> {
    let contents = Config::read_file(path)?;
    let env = std::env::vars().collect::<BTreeMap<_, _>>();
    let config = resolve_config(&env, contents.as_deref())?;
    info!(
        "config resolved: base={} targets={} data_dir={}",
        config.base_currency,
        config.target_currencies.len(),
        config.data_dir.display()
    );
    Ok(config)
}

fn resolve_date(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match raw {
        Some(raw) => Ok(parse_date(raw)?),
        None => Ok(today),
    }
}

fn latest_gold_date(store: &FsStore) -> Result<Option<NaiveDate>> {
    Ok(store.list(Layer::Gold)?.iter().filter_map(|k| k.date()).max())
}

fn print_outcome<T: serde::Serialize>(outcome: &T, location: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(outcome)?),
        _ => println!("{location}"),
    }
    Ok(())
}

fn print_gold(rows: &[GoldRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_gold_table(rows)),
        OutputFormat::Json => println!("{}", render_json(rows)?),
        OutputFormat::Csv => print!("{}", gold_to_csv(rows)?),
    }
    Ok(())
}
