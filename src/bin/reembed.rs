use anyhow::{Context, Result};
use clap::Parser;
use raggify::config::Config;
use raggify::db::{migrate, Db};
use raggify::embed::EmbedManager;
use raggify::model::Modality;
use raggify::store::{media, text};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "reembed")]
#[command(about = "Re-embed chunks/nodes missing a vector (or all of them with --force)")]
struct Args {
    /// Re-embed every node in each configured space, not just ones missing a vector
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();
    let args = Args::parse();

    let config = Config::load().context("failed to load config")?;
    let db = Db::new(config.vector_db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir)).await?;

    let embed = EmbedManager::from_config(&config.embed)?;

    let mut total = 0usize;
    for modality in Modality::all() {
        let Some(container) = embed.container(modality) else {
            continue;
        };
        let space_key = container.space_key.clone();
        log::info!("reembedding space {space_key} ({modality})");

        match modality {
            Modality::Text => {
                let rows = if args.force {
                    text::all_ids_with_text(&db, &space_key).await?
                } else {
                    text::ids_missing_embedding(&db, &space_key).await?
                };
                total += reembed_text(&db, &embed, &rows).await?;
            }
            other => {
                let rows = if args.force {
                    media::all_ids_with_path(&db, other, &space_key).await?
                } else {
                    media::ids_missing_embedding(&db, other, &space_key).await?
                };
                total += reembed_media(&db, &embed, other, &rows).await?;
            }
        }
    }

    log::info!("reembed complete: {total} node(s) updated");
    Ok(())
}

async fn reembed_text(db: &Db, embed: &EmbedManager, rows: &[(String, String)]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let texts: Vec<String> = rows.iter().map(|(_, t)| t.clone()).collect();
    let embeddings = embed.embed_text(texts).await?;
    for ((id, _), vector) in rows.iter().zip(embeddings.iter()) {
        text::update_embedding(db, id, vector).await?;
    }
    log::info!("  {} chunk(s) re-embedded", rows.len());
    Ok(rows.len())
}

async fn reembed_media(db: &Db, embed: &EmbedManager, modality: Modality, rows: &[(String, String)]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let paths: Vec<PathBuf> = rows.iter().map(|(_, p)| PathBuf::from(p)).collect();
    let embeddings = match modality {
        Modality::Image => embed.embed_image(paths).await?,
        Modality::Audio => embed.embed_audio(paths).await?,
        Modality::Video => embed.embed_video(paths).await?,
        Modality::Text => unreachable!("reembed_media is never called with Modality::Text"),
    };
    for ((id, _), vector) in rows.iter().zip(embeddings.iter()) {
        media::update_embedding(db, modality, id, vector).await?;
    }
    log::info!("  {} node(s) re-embedded", rows.len());
    Ok(rows.len())
}
