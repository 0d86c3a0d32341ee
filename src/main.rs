use anyhow::{Context, Result};
use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

mod error;
mod executor;
mod reconciler;

use executor::{diff_result_sets, QueryExecutor, ResultSet};
use reconciler::QueryReconciler;

// Custom formatter for consistent module name width
const MODULE_NAME_WIDTH: usize = 24;

struct CustomFormatter;

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        // Format timestamp
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let datetime =
            chrono::DateTime::<chrono::Utc>::from_timestamp(now.as_secs() as i64, now.subsec_nanos())
                .unwrap_or_default();

        // Format module name with fixed width (right-padded) and remove common prefix
        let target = metadata.target();
        let cleaned_target = target.strip_prefix("sql_query_diff::").unwrap_or(target);
        let padded_target = format!("{:<width$}", cleaned_target, width = MODULE_NAME_WIDTH);

        // Write formatted log line
        write!(
            writer,
            "{} {:>5} {}: ",
            datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            metadata.level(),
            padded_target
        )?;

        // Format the event fields
        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[derive(Parser, Debug)]
#[command(name = "sql-query-diff")]
#[command(about = "Reconciles two SQL queries to their common columns and diffs the result sets")]
pub struct Args {
    /// File containing the first query
    pub query1: PathBuf,

    /// File containing the second query
    pub query2: PathBuf,

    /// SQLite database file to execute the rewritten queries against
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging with custom formatter for consistent module name width
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            log_level
        ))
        .event_format(CustomFormatter)
        .init();

    let raw1 = std::fs::read_to_string(&args.query1)
        .with_context(|| format!("Failed to read query file: {}", args.query1.display()))?;
    let raw2 = std::fs::read_to_string(&args.query2)
        .with_context(|| format!("Failed to read query file: {}", args.query2.display()))?;

    info!(
        "Reconciling queries from {} and {}",
        args.query1.display(),
        args.query2.display()
    );

    let reconciliation = match QueryReconciler::reconcile(&raw1, &raw2) {
        Ok(reconciliation) => reconciliation,
        Err(e) => {
            error!("{}. Be sure to exclude drop/create/delete/insert keywords.", e);
            return Err(e.into());
        }
    };

    if reconciliation.has_common_fields() {
        info!("Common fields: {}", reconciliation.common_fields.join(", "));
    } else {
        warn!("The two queries share no fields; the rewritten queries will fail when executed");
    }

    println!("{}", reconciliation.query1);
    println!("{}", reconciliation.query2);

    if let Some(db_path) = &args.database {
        let executor = QueryExecutor::open(db_path)?;
        info!("Executing rewritten queries against: {}", db_path.display());

        let left = executor.execute(&reconciliation.query1)?;
        let right = executor.execute(&reconciliation.query2)?;
        info!(
            "Query 1 returned {} rows, query 2 returned {} rows",
            left.row_count(),
            right.row_count()
        );

        println!("\n=== Query 1 results ===\n{}", left);
        println!("=== Query 2 results ===\n{}", right);

        let diff = diff_result_sets(&left, &right);
        if diff.is_empty() {
            info!("✅ Result sets are identical");
        } else {
            warn!(
                "Result sets differ: {} rows only in query 1, {} rows only in query 2",
                diff.only_left.len(),
                diff.only_right.len()
            );
            if !diff.only_left.is_empty() {
                let unique = ResultSet {
                    columns: left.columns.clone(),
                    rows: diff.only_left,
                };
                println!("=== Rows only in query 1 ===\n{}", unique);
            }
            if !diff.only_right.is_empty() {
                let unique = ResultSet {
                    columns: right.columns.clone(),
                    rows: diff.only_right,
                };
                println!("=== Rows only in query 2 ===\n{}", unique);
            }
        }
    }

    Ok(())
}
