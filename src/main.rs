//! metrics-topn CLI
//!
//! Command-line front end for top-N queries against a SQLite metrics store:
//! - Run a top-N query
//! - Seed a metric table with demo data
//! - Print the default config

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use metrics_topn::config::generate_default_config;
use metrics_topn::*;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "topn")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rank metric entities by their average value over a time window")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a top-N query
    Query {
        /// Metric (table) name
        metric: String,
        /// Column to average
        #[arg(short, long, default_value = "value")]
        value_column: String,
        /// Window start, in the step's format (e.g. 2023-01-01, "2023-01-01 0800")
        #[arg(short, long)]
        start: String,
        /// Window end, inclusive
        #[arg(short, long)]
        end: String,
        /// Bucket granularity (day, hour, minute, second)
        #[arg(long, default_value = "day")]
        step: Step,
        /// Number of entities to return
        #[arg(short = 'n', long, default_value = "10")]
        top_n: u32,
        /// Ranking direction (asc, desc)
        #[arg(short, long, default_value = "desc")]
        order: String,
        /// Equality filters in key=value format
        #[arg(short = 'F', long = "filter")]
        filters: Vec<String>,
    },

    /// Create a metric table and fill it with demo rows
    Seed {
        /// Metric (table) name
        metric: String,
        /// Value column to create
        #[arg(short, long, default_value = "value")]
        value_column: String,
        /// Number of entities
        #[arg(long, default_value = "5")]
        entities: usize,
        /// First bucket, in the step's format
        #[arg(short, long)]
        start: String,
        /// Last bucket, inclusive
        #[arg(short, long)]
        end: String,
        /// Bucket granularity (day, hour, minute, second)
        #[arg(long, default_value = "day")]
        step: Step,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Query {
            metric,
            value_column,
            start,
            end,
            step,
            top_n,
            order,
            filters,
        } => {
            let duration = Duration::parse(&start, &end, step)?;
            let filters = filters
                .iter()
                .map(|f| parse_filter(f))
                .collect::<Result<Vec<_>, _>>()?;

            let client = SqliteClient::from_config(&config.storage)?;
            let builder = TopNQueryBuilder::with_schema(client, config.schema);
            let condition = TopNCondition::new(metric, top_n, Order::from_str_lossy(&order));

            let records = builder.sort_metrics(&condition, &value_column, &duration, &filters)?;
            print_records(&records, &cli.format)?;
        }

        Commands::Seed {
            metric,
            value_column,
            entities,
            start,
            end,
            step,
        } => {
            let duration = Duration::parse(&start, &end, step)?;
            let client = SqliteClient::from_config(&config.storage)?;
            let rows = seed_metric(&client, &config.schema, &metric, &value_column, entities, &duration)?;
            println!("Inserted {} rows into {}", rows, metric);
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "metrics_topn={0},topn={0}",
            logging.level
        ))
    });

    // Logs go to stderr so JSON output on stdout stays machine-readable
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Parse `key=value`; numeric values are bound as numbers
fn parse_filter(s: &str) -> Result<KeyValue, String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid filter {:?}, expected key=value", s))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid filter {:?}, empty key", s));
    }

    let value = value.trim();
    let value = if let Ok(i) = value.parse::<i64>() {
        BindValue::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        BindValue::Real(f)
    } else {
        BindValue::Text(value.to_string())
    };

    Ok(KeyValue::new(key, value))
}

fn print_records(records: &[SelectedRecord], format: &str) -> Result<(), serde_json::Error> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(records)?),
        _ => {
            if records.is_empty() {
                println!("No entities in range");
                return Ok(());
            }
            println!("{:<6} {:<40} {:>16}", "RANK", "ENTITY", "VALUE");
            for (rank, record) in records.iter().enumerate() {
                println!("{:<6} {:<40} {:>16}", rank + 1, record.id, record.value);
            }
        }
    }
    Ok(())
}

fn step_delta(step: Step) -> chrono::Duration {
    match step {
        Step::Day => chrono::Duration::days(1),
        Step::Hour => chrono::Duration::hours(1),
        Step::Minute => chrono::Duration::minutes(1),
        Step::Second => chrono::Duration::seconds(1),
    }
}

fn seed_metric(
    client: &SqliteClient,
    schema: &MetricsSchema,
    metric: &str,
    value_column: &str,
    entities: usize,
    duration: &Duration,
) -> ExecutionResult<usize> {
    client.create_metric_table(
        metric,
        &schema.entity_id_column,
        &schema.time_bucket_column,
        value_column,
        &[],
    )?;

    let columns = [
        schema.entity_id_column.as_str(),
        schema.time_bucket_column.as_str(),
        value_column,
    ];

    let mut inserted = 0;
    let mut at: NaiveDateTime = duration.start;
    while at <= duration.end {
        let bucket = duration.step.time_bucket(at);
        for entity in 0..entities {
            // Each entity gets its own level plus a small per-bucket wobble
            let value = (entity as f64 + 1.0) * 10.0 + (bucket % 7) as f64;
            client.insert_metric_row(
                metric,
                &columns,
                &[format!("entity-{}", entity).into(), bucket.into(), value.into()],
            )?;
            inserted += 1;
        }
        at += step_delta(duration.step);
    }

    tracing::info!(metric, rows = inserted, "Seeded metric table");
    Ok(inserted)
}
