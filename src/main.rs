use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use equity_engine::{
    store, EngineConfig, EquityPipeline, ReportingPeriod, SnapshotWriter,
};

const DEFAULT_DB: &str = "equity.db";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("init") => run_init(args.get(2)),
        Some("import") => run_import(&args[2..]),
        Some("run") => run_period(&args[2..]),
        Some("correct") => run_correct(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("equity-engine {}", equity_engine::VERSION);
    println!();
    println!("Usage:");
    println!("  equity-engine init [db]");
    println!("  equity-engine import <records.csv> [db]");
    println!("  equity-engine run <YYYY-Qn> [db] [config.json]");
    println!("  equity-engine correct <record_id> <field> <value> [reason] [db]");
}

fn open_database(path: Option<&String>) -> Result<Connection> {
    let db_path = path.map(|s| s.as_str()).unwrap_or(DEFAULT_DB);
    Connection::open(db_path).with_context(|| format!("failed to open database {}", db_path))
}

fn run_init(db: Option<&String>) -> Result<()> {
    let conn = open_database(db)?;
    store::setup_database(&conn)?;
    equity_engine::setup_snapshot_tables(&conn)?;
    println!("✓ Database initialized with WAL mode");
    Ok(())
}

fn run_import(args: &[String]) -> Result<()> {
    let csv_path = args
        .first()
        .context("usage: equity-engine import <records.csv> [db]")?;
    let conn = open_database(args.get(1))?;
    store::setup_database(&conn)?;

    println!("📂 Importing {}...", csv_path);
    let (inserted, duplicates) = store::import_csv(&conn, Path::new(csv_path))?;
    println!("✓ Inserted: {} records", inserted);
    println!("✓ Skipped duplicates: {}", duplicates);

    Ok(())
}

fn load_config(path: Option<&String>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p)),
        None => Ok(EngineConfig::default()),
    }
}

fn run_period(args: &[String]) -> Result<()> {
    let period: ReportingPeriod = args
        .first()
        .context("usage: equity-engine run <YYYY-Qn> [db] [config.json]")?
        .parse()?;
    let conn = open_database(args.get(1))?;
    let config = load_config(args.get(2))?;

    let pipeline = EquityPipeline::new(conn, config)?;
    println!("📊 Computing equity snapshots for {}...", period);
    let report = pipeline.run(period)?;

    println!("✓ {} records aggregated", report.record_count);
    println!(
        "✓ Published {} region rows, {} sector rows",
        report.region_rows, report.sector_rows
    );
    println!("✓ Bias events emitted: {}", report.bias_events);
    for (dimension, hash) in &report.content_hashes {
        println!("  {} {}", &hash[..12], dimension);
    }

    let writer = SnapshotWriter::new(pipeline.conn());
    for row in writer.published_geographic(period)? {
        let direction = if row.gap_percentage < 0.0 { "under" } else { "over" };
        println!(
            "  {:<24} actual {:>5.1}% expected {:>5.1}% ({}served)",
            row.region,
            row.actual_share * 100.0,
            row.expected_share * 100.0,
            direction
        );
    }

    Ok(())
}

fn run_correct(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        anyhow::bail!("usage: equity-engine correct <record_id> <field> <value> [reason] [db]");
    }
    let (record_id, field, value) = (&args[0], &args[1], &args[2]);
    let reason = args.get(3).map(|s| s.as_str()).unwrap_or("");
    let conn = open_database(args.get(4))?;

    let pipeline = EquityPipeline::new(conn, EngineConfig::default())?;
    let (outcome, reports) =
        pipeline.apply_correction(record_id, field, value, reason, "cli")?;

    println!("✓ Correction {} applied (version {})", outcome.correction_id, outcome.new_version);
    println!("✓ Recomputed {} period(s):", reports.len());
    for report in &reports {
        println!("  {} ({} records, {} bias events)", report.period, report.record_count, report.bias_events);
    }

    Ok(())
}
