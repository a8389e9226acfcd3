use anyhow::{Context, Result};
use raggify::config::Config;
use raggify::db::Db;
use raggify::model::Modality;

fn table_name(modality: Modality) -> &'static str {
    match modality {
        Modality::Text => "chunks",
        Modality::Image => "image_nodes",
        Modality::Audio => "audio_nodes",
        Modality::Video => "video_nodes",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let config = Config::load().context("failed to load config")?;
    let db = Db::new(config.vector_db_path());

    println!("\n=== raggify store statistics ===\n");

    let doc_count: i64 = db
        .with_connection(|conn| conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0)))
        .await
        .context("documents table missing; run migrations first")?;
    println!("Documents: {doc_count}\n");

    println!(
        "{:<10} {:>10} {:>30} {:>12} {:>12}",
        "Modality", "Nodes", "Space", "Embedded", "Missing"
    );
    println!("{:-<76}", "");

    for modality in Modality::all() {
        let table = table_name(modality);
        let sql = format!(
            "SELECT space_key, COUNT(*), SUM(embedding IS NOT NULL) FROM {table} GROUP BY space_key ORDER BY space_key"
        );
        let rows: Vec<(String, i64, i64)> = db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        if rows.is_empty() {
            println!("{:<10} {:>10} {:>30} {:>12} {:>12}", modality.to_string(), 0, "-", 0, 0);
            continue;
        }

        for (space_key, total, embedded) in rows {
            println!(
                "{:<10} {:>10} {:>30} {:>12} {:>12}",
                modality.to_string(),
                total,
                space_key,
                embedded,
                total - embedded,
            );
        }
    }

    println!();
    Ok(())
}
