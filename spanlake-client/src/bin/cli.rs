//! SpanLake CLI - Interactive SQL shell for Spanner-compatible databases

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, CellAlignment, Color,
    ContentArrangement, Table,
};
use prost_types::value::Kind;
use prost_types::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use spanlake_client::{Client, ClientConfig, ReadContext, Row, Statement};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// SpanLake CLI - Interactive SQL shell
#[derive(Parser, Debug)]
#[command(name = "spanlake-cli")]
#[command(about = "Interactive SQL shell for Spanner-compatible databases", long_about = None)]
struct Args {
    /// Database path: projects/P/instances/I/databases/D
    #[arg(short = 'D', long, env = "SPANLAKE_DATABASE")]
    database: String,

    /// SQL statement to execute (if provided, runs in non-interactive mode)
    #[arg(short, long)]
    query: Option<String>,

    /// Run DML as partitioned DML instead of in a read-write transaction
    #[arg(short, long)]
    partitioned: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = ClientConfig::load().context("failed to load configuration")?;
    init_tracing(&config, args.debug);

    println!("Connecting to {}...", args.database);
    let client = Client::with_config(&args.database, config)
        .await
        .context("failed to create client")?;
    println!("Connected successfully!\n");

    let outcome = match &args.query {
        Some(query) => execute_and_display(&client, query, args.partitioned).await,
        None => interactive_mode(&client, &args).await,
    };
    client.close().await;
    outcome
}

fn init_tracing(config: &ClientConfig, debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

async fn interactive_mode(client: &Client, args: &Args) -> Result<()> {
    println!("SpanLake Interactive SQL Shell");
    println!("Type SQL statements and press Enter. Type 'exit' or 'quit' to exit.");
    println!("\\pool shows the session pool, \\metrics the client metrics.");
    println!("Press Ctrl-C twice to exit.\n");

    let mut rl = DefaultEditor::new()?;
    let history_file = dirs::home_dir()
        .map(|mut p| {
            p.push(".spanlake_history");
            p
        })
        .unwrap_or_default();

    if history_file.exists() {
        let _ = rl.load_history(&history_file);
    }

    let mut interrupt_count = 0;

    loop {
        match rl.readline("spanlake> ") {
            Ok(line) => {
                interrupt_count = 0;

                let query = line.trim();
                if query.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(query);

                if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
                    println!("Goodbye!");
                    break;
                }

                let result = match query {
                    "\\pool" => print_json(&client.pool().snapshot()),
                    "\\metrics" => match client.metrics_snapshot() {
                        Some(snapshot) => print_json(&snapshot),
                        None => {
                            println!("Metrics are disabled");
                            Ok(())
                        }
                    },
                    _ => execute_and_display(client, query, args.partitioned).await,
                };
                if let Err(e) = result {
                    eprintln!("Error: {:#}", e);
                    if args.debug {
                        eprintln!("Details: {:?}", e);
                    }
                }
                println!();
            }
            Err(ReadlineError::Interrupted) => {
                interrupt_count += 1;
                if interrupt_count >= 2 {
                    println!("\nGoodbye!");
                    break;
                }
                println!("^C (press Ctrl-C again to exit)");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error reading input: {}", err);
                break;
            }
        }
    }

    if !history_file.as_os_str().is_empty() {
        let _ = rl.save_history(&history_file);
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute_and_display(client: &Client, sql: &str, partitioned: bool) -> Result<()> {
    let start = Instant::now();

    if is_query_statement(sql) {
        let rows = client.single().query(Statement::new(sql)).collect().await?;
        let elapsed = start.elapsed();

        if rows.is_empty() {
            println!("(No rows returned)");
        } else {
            display_results(&rows);
        }
        println!(
            "{} row{} in {:.3}s",
            rows.len(),
            if rows.len() == 1 { "" } else { "s" },
            elapsed.as_secs_f64()
        );
        return Ok(());
    }

    let affected = if partitioned {
        client.partitioned_update(Statement::new(sql)).await?
    } else {
        let count = Arc::new(AtomicI64::new(0));
        let sql = sql.to_string();
        client
            .read_write_transaction(|tx| {
                let count = count.clone();
                let stmt = Statement::new(sql.clone());
                async move {
                    count.store(tx.update(stmt).await?, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await?;
        count.load(Ordering::SeqCst)
    };
    println!(
        "{} row{} affected",
        affected,
        if affected == 1 { "" } else { "s" }
    );
    println!("{:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn is_query_statement(sql: &str) -> bool {
    let normalized = sql
        .lines()
        .map(|line| match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_uppercase();

    normalized.starts_with("SELECT")
        || normalized.starts_with("WITH")
        || normalized.starts_with("GRAPH")
        || normalized.starts_with('@')
        || normalized.starts_with('(')
}

fn display_results(rows: &[Row]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header: Vec<Cell> = rows[0]
        .column_names()
        .into_iter()
        .map(|name| {
            Cell::new(name)
                .fg(Color::Cyan)
                .set_alignment(CellAlignment::Center)
        })
        .collect();
    table.set_header(header);

    for row in rows {
        table.add_row(row.values().iter().map(|v| Cell::new(format_value(v))));
    }

    println!("{}", table);
}

fn format_value(value: &Value) -> String {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => "NULL".to_string(),
        Some(Kind::StringValue(s)) => s.clone(),
        Some(Kind::NumberValue(n)) => n.to_string(),
        Some(Kind::BoolValue(b)) => b.to_string(),
        Some(Kind::ListValue(list)) => {
            let items: Vec<String> = list.values.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Some(Kind::StructValue(s)) => {
            let items: Vec<String> = s
                .fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", format_value(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_queries_past_comments() {
        assert!(is_query_statement("-- list\nSELECT 1"));
        assert!(is_query_statement("with t as (select 1) select * from t"));
        assert!(!is_query_statement("UPDATE T SET x = 1 WHERE true"));
        assert!(!is_query_statement("DELETE FROM T WHERE true"));
    }

    #[test]
    fn formats_nested_values() {
        let list = Value {
            kind: Some(Kind::ListValue(prost_types::ListValue {
                values: vec![
                    Value {
                        kind: Some(Kind::StringValue("1".into())),
                    },
                    Value {
                        kind: Some(Kind::NullValue(0)),
                    },
                ],
            })),
        };
        assert_eq!(format_value(&list), "[1, NULL]");
    }
}
