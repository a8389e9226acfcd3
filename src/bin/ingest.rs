use anyhow::{Context, Result};
use clap::Parser;
use raggify::config::Config;
use raggify::db::{migrate, Db};
use raggify::pipeline::ingest_source;
use std::path::Path;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest a single path or URL, bypassing the job queue")]
struct Args {
    /// File path or http(s):// URL to ingest
    source: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();
    let args = Args::parse();

    let config = Config::load().context("failed to load config")?;

    let db = Db::new(config.vector_db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir)).await?;

    let embed = raggify::embed::EmbedManager::from_config(&config.embed)?;

    log::info!("ingesting {}", args.source);
    let start = Instant::now();
    let cancel = || false;
    let report = ingest_source(&db, &embed, &args.source, &config, &cancel).await?;

    if report.skipped_duplicate_source {
        log::info!("source already ingested, skipped ({:?})", start.elapsed());
    } else {
        log::info!("ingested {} node(s) in {:?}", report.nodes_written, start.elapsed());
    }
    Ok(())
}
