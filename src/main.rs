//! db-layer - command-line entry point.
//!
//! Opens one connection through the provider facade, runs a single command
//! and prints its result.

use clap::Parser;
use db_layer::config::{Config, ExecuteMode};
use db_layer::db::{DbManager, TransactionMode};
use db_layer::error::DbResult;
use db_layer::format;
use db_layer::models::{DataReader, DataRow, DataTable};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only results.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Drain a reader into tables, one per result set.
fn drain_reader(reader: &mut DataReader) -> DbResult<Vec<DataTable>> {
    let mut tables = Vec::new();
    loop {
        let columns = reader.columns()?.to_vec();
        if !columns.is_empty() {
            let mut rows = Vec::new();
            while reader.read()? {
                let values = (0..columns.len())
                    .map(|i| reader.get(i).cloned())
                    .collect::<DbResult<Vec<_>>>()?;
                rows.push(DataRow::new(values));
            }
            tables.push(DataTable::new(columns, rows));
        }
        if !reader.next_result()? {
            break;
        }
    }
    reader.close();
    Ok(tables)
}

async fn execute(manager: &mut DbManager, config: &Config) -> DbResult<String> {
    let kind = config.command_kind();
    let text = config.command_text.as_str();
    let started = Instant::now();

    let output = match config.mode {
        ExecuteMode::Reader => {
            let reader = manager.execute_reader(kind, text).await?;
            let tables = drain_reader(reader)?;
            format::render_tables(&tables, config.format, elapsed_ms(started))
        }
        ExecuteMode::NonQuery => {
            let affected = manager.execute_non_query(kind, text).await?;
            format::render_affected(affected, config.format, elapsed_ms(started))
        }
        ExecuteMode::Scalar => {
            let value = manager.execute_scalar(kind, text).await?;
            format::render_scalar(value.as_ref(), config.format)
        }
        ExecuteMode::Tabular => {
            let data_set = manager.execute_tabular(kind, text).await?;
            format::render_tables(&data_set.tables, config.format, elapsed_ms(started))
        }
    };
    Ok(output)
}

async fn run(config: &Config) -> DbResult<String> {
    let mut manager = DbManager::with_connection_string(config.provider, &config.connection_string)
        .with_options(config.connection_options());
    manager.open().await?;

    for spec in &config.params {
        let mut parameter = manager.create_parameter()?.with_direction(spec.direction);
        if !spec.name.is_empty() {
            parameter.set_name(spec.name.as_str());
        }
        parameter.set_value(spec.value.clone());
        manager.add_parameter(parameter);
    }

    if config.transaction {
        manager.begin_transaction(TransactionMode::RequireNew).await?;
    }

    let result = execute(&mut manager, config).await;

    let finished = match &result {
        Ok(_) => manager.commit_transaction().await,
        Err(_) => manager.rollback_transaction().await,
    };
    if let Err(e) = &finished {
        warn!(error = %e, "Failed to end transaction");
    }

    if let Err(e) = manager.dispose().await {
        warn!(error = %e, "Failed to close connection");
    }

    let output = result?;
    finished?;
    Ok(output)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[tokio::main]
async fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        provider = %config.provider,
        mode = %config.mode,
        "Starting db-layer v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(&config).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {hint}");
            }
            std::process::exit(1);
        }
    }
}
