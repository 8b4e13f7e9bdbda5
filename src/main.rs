//! Command-line interface for livequery-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Route table: short-ref, entity, connection, templates
//! livequery-sync --config livequery.yaml routes
//!
//! # Trigger SQL for every realtime table (pipe into psql to install by hand)
//! livequery-sync --config livequery.yaml trigger-sql --connection default
//!
//! # Install triggers, then stream sync messages as JSON lines
//! livequery-sync --config livequery.yaml listen
//!
//! # Collection read with a filter and a page size
//! livequery-sync --config livequery.yaml query users/u1/orders \
//!   --filter status:eq:open --filter total:gte:100 --limit 10
//!
//! # Write
//! livequery-sync --config livequery.yaml query users/u1/orders \
//!   --method post --body '{"title": "first"}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use livequery_core::{DbFamily, Filter, Method, QueryOptions, Row, SortDir};
use livequery_postgresql_trigger::install_statements;
use livequery_sync::{ChangeHub, LiveQuery, LivequeryConfig, QueryParams};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "livequery-sync")]
#[command(about = "Reference-addressed queries and realtime sync over PostgreSQL and MongoDB")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(long, env = "LIVEQUERY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the registered routes
    Routes,

    /// Print the change-capture trigger SQL for realtime tables
    TriggerSql {
        /// Only tables of this connection
        #[arg(long)]
        connection: Option<String>,
    },

    /// Stream sync messages as JSON lines
    Listen {
        /// Do not install triggers before listening
        #[arg(long)]
        no_install: bool,

        /// Broadcast buffer size
        #[arg(long, default_value = "1024")]
        capacity: usize,
    },

    /// Run one request against a reference
    Query {
        /// Concrete reference, e.g. users/u1/orders
        path: String,

        /// get, post, put, patch or delete
        #[arg(long, default_value = "get")]
        method: String,

        /// Filter as field:op:value; value is parsed as JSON, else taken as a string
        #[arg(long = "filter", value_name = "FILTER")]
        filters: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        order_by: Option<String>,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        sort: String,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Free-text search over the route's search fields
        #[arg(long)]
        search: Option<String>,

        /// Comma-separated fields to return
        #[arg(long, value_delimiter = ',')]
        select: Option<Vec<String>>,

        /// JSON object body for writes
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = LivequeryConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command {
        Commands::Routes => print_routes(&config),
        Commands::TriggerSql { connection } => print_trigger_sql(&config, connection.as_deref()),
        Commands::Listen {
            no_install,
            capacity,
        } => run_listen(&config, !no_install, capacity).await,
        Commands::Query {
            path,
            method,
            filters,
            limit,
            order_by,
            sort,
            cursor,
            search,
            select,
            body,
        } => {
            let method: Method = method.parse()?;
            let params = QueryParams {
                filters: filters
                    .iter()
                    .map(|f| parse_filter(f))
                    .collect::<anyhow::Result<_>>()?,
                options: QueryOptions {
                    limit,
                    order_by,
                    sort: sort.parse::<SortDir>()?,
                    cursor,
                    select,
                    search,
                },
                body: match body {
                    Some(body) => parse_body(&body)?,
                    None => Row::new(),
                },
            };
            run_query(&config, method, &path, params).await
        }
    }
}

fn print_routes(config: &LivequeryConfig) -> anyhow::Result<()> {
    let registry = config.registry()?;
    for entry in registry.entries() {
        let templates: Vec<String> = entry.templates.iter().map(|t| t.to_string()).collect();
        println!(
            "{}\t{}@{}\t{:?}{}\t{}",
            entry.short_ref,
            entry.entity,
            entry.connection,
            entry.family,
            if entry.realtime { " realtime" } else { "" },
            templates.join(", ")
        );
    }
    Ok(())
}

fn print_trigger_sql(config: &LivequeryConfig, only: Option<&str>) -> anyhow::Result<()> {
    let registry = config.registry()?;
    for connection in &config.connections {
        if connection.family != DbFamily::Relational {
            continue;
        }
        if only.is_some_and(|name| name != connection.name) {
            continue;
        }
        for table in registry.realtime_entities(&connection.name) {
            println!("-- {} ({})", table, connection.name);
            let templates = registry.realtime_templates(&connection.name, table);
            for statement in install_statements(table, templates) {
                println!("{statement};");
            }
            println!();
        }
    }
    Ok(())
}

async fn run_listen(
    config: &LivequeryConfig,
    install_triggers: bool,
    capacity: usize,
) -> anyhow::Result<()> {
    let registry = Arc::new(config.registry()?);
    let hub = ChangeHub::new(capacity);
    let mut receiver = hub.subscribe();
    let handles = hub.start(config, registry, install_triggers).await?;
    if handles.is_empty() {
        anyhow::bail!("No realtime routes configured");
    }

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Ok(message) => println!("{}", serde_json::to_string(&message)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {skipped} sync messages, consumer too slow");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, stopping listeners");
                break;
            }
        }
    }

    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn run_query(
    config: &LivequeryConfig,
    method: Method,
    path: &str,
    params: QueryParams,
) -> anyhow::Result<()> {
    let service = LiveQuery::connect(config).await?;
    match service.query(method, path, params).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_body())?);
            Err(e.into())
        }
    }
}

/// `field:op:value`; the value may itself contain colons.
fn parse_filter(s: &str) -> anyhow::Result<Filter> {
    let mut parts = s.splitn(3, ':');
    let (Some(field), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("Invalid filter '{s}', expected field:op:value");
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(Filter::new(field, op, value))
}

fn parse_body(s: &str) -> anyhow::Result<Row> {
    match serde_json::from_str(s).context("Invalid JSON body")? {
        Value::Object(row) => Ok(row),
        _ => anyhow::bail!("Body must be a JSON object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter("total:gte:100").unwrap();
        assert_eq!(filter.field, "total");
        assert_eq!(filter.op, "gte");
        assert_eq!(filter.value, json!(100));

        let filter = parse_filter("status:eq:open").unwrap();
        assert_eq!(filter.value, json!("open"));

        let filter = parse_filter("at:eq:10:30").unwrap();
        assert_eq!(filter.value, json!("10:30"));

        assert!(parse_filter("status:eq").is_err());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"a": 1}"#).unwrap()["a"], json!(1));
        assert!(parse_body("[1]").is_err());
        assert!(parse_body("nope").is_err());
    }
}
