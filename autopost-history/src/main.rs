use anyhow::{Context, Result};
use clap::Parser;
use libautopost::config::{expand_path, Config};
use libautopost::db::{Database, RecordQuery};
use libautopost::types::{PublishRecord, PublishStatus};

#[derive(Parser, Debug)]
#[command(name = "autopost-history")]
#[command(version, about = "Query the local publish history")]
#[command(long_about = r#"Query the local publish history with filtering and formatting options.

EXAMPLES:
    # Show the last 20 attempts (default)
    autopost-history

    # Only failures, with the reason
    autopost-history --status failed

    # One account since a date
    autopost-history --account 3f1c... --since 2025-10-01

    # Search content
    autopost-history --search BTC

    # Summary counts
    autopost-history --stats

    # JSON output for scripting
    autopost-history --format json | jq '.[] | select(.status == "failed") | .failure_detail'

OUTPUT FORMATS:
    text  - Human-readable lines (default)
    json  - JSON array
    jsonl - JSON lines, one record per line
    csv   - CSV with headers

EXIT CODES:
    0 - Success (including empty results)
    1 - Error (database not found, query failed, etc.)
    3 - Invalid input
"#)]
struct Args {
    /// Filter by status (draft, scheduled, posted, failed)
    #[arg(long, value_name = "STATUS")]
    status: Option<String>,

    /// Filter by account id
    #[arg(short, long, value_name = "ID")]
    account: Option<String>,

    /// Show attempts since this date (Unix timestamp, YYYY-MM-DD, or RFC 3339)
    #[arg(long, value_name = "DATE")]
    since: Option<String>,

    /// Only attempts whose content contains this text
    #[arg(short, long, value_name = "TERM")]
    search: Option<String>,

    /// Maximum number of records to return
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl", "csv"])]
    format: String,

    /// Print summary counts instead of records
    #[arg(long)]
    stats: bool,
}

/// Parse date string to Unix timestamp
fn parse_date(date_str: &str) -> Result<i64> {
    if let Ok(timestamp) = date_str.parse::<i64>() {
        return Ok(timestamp);
    }

    let dt = chrono::DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.timestamp())
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
        })
        .with_context(|| {
            format!(
                "Invalid date format: {}. Use a Unix timestamp, YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ",
                date_str
            )
        })?;

    Ok(dt)
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn print_records(records: &[PublishRecord], format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(records)?),
        "jsonl" => {
            for record in records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        "csv" => {
            println!("id,timestamp,status,account_id,failure_detail,content");
            for record in records {
                println!(
                    "{},{},{},{},{},{}",
                    record.id,
                    record.timestamp,
                    record.status,
                    record.account_id,
                    csv_field(record.failure_detail.as_deref().unwrap_or("")),
                    csv_field(&record.content)
                );
            }
        }
        _ => {
            for record in records {
                let timestamp = chrono::DateTime::from_timestamp(record.timestamp, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| record.timestamp.to_string());

                let preview: String = record.content.chars().take(60).collect();
                let preview = if record.content.chars().count() > 60 {
                    format!("{}...", preview)
                } else {
                    preview
                };

                let symbol = if record.is_posted() { "✓" } else { "✗" };
                println!(
                    "{} {} | {} | {} | {}",
                    symbol, timestamp, record.status, record.account_id, preview
                );
                if let Some(detail) = &record.failure_detail {
                    println!("    {}", detail);
                }
            }
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    let db_path = expand_path(&config.database.path);
    if !db_path.exists() {
        eprintln!("Error: Database not found at {}", db_path.display());
        eprintln!("Nothing has been published yet. Start a run with: autopost-run");
        std::process::exit(1);
    }

    let db = Database::new(&db_path.to_string_lossy())
        .await
        .context("Failed to open database")?;

    if args.stats {
        let stats = db.stats().await.context("Failed to compute statistics")?;
        if args.format == "text" {
            println!("Total:        {}", stats.total);
            println!("Posted:       {}", stats.posted);
            println!("Failed:       {}", stats.failed);
            println!("Success rate: {}%", stats.success_rate);
        } else {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        return Ok(());
    }

    let status = match args.status.as_deref() {
        Some(s) => Some(s.parse::<PublishStatus>()?),
        None => None,
    };
    let since = match args.since.as_deref() {
        Some(s) => Some(parse_date(s)?),
        None => None,
    };

    let query = RecordQuery {
        status,
        account_id: args.account,
        since,
        search: args.search,
        limit: args.limit,
    };
    let records = db
        .query_records(&query)
        .await
        .context("Failed to query history")?;

    print_records(&records, &args.format)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    libautopost::logging::init_default();

    tracing::debug!("autopost-history started with args: {:?}", args);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<libautopost::AutopostError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(parse_date("2025-10-01").unwrap(), 1_759_276_800);
        assert_eq!(parse_date("2025-10-01T00:00:00Z").unwrap(), 1_759_276_800);
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_csv_field_escapes_quotes() {
        assert_eq!(csv_field(r#"say "hi""#), r#""say ""hi""""#);
    }
}
