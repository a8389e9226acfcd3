use anyhow::Result;
use raggify::worker::Worker;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    log::info!("starting raggify server v{}", env!("CARGO_PKG_VERSION"));

    let runtime = raggify::runtime::get().await?;
    log::info!(
        "configuration loaded: project={} knowledge_base={}",
        runtime.config.general.project,
        runtime.config.general.knowledge_base,
    );

    let worker: Arc<Worker> = Worker::start();
    let router = raggify::rest::build_router(worker.clone(), &runtime.config);

    let port = runtime.config.http_server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    log::info!("listening on 0.0.0.0:{port}");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutdown signal received, draining worker");
    };

    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;

    worker.shutdown().await;
    raggify::runtime::shutdown().await;
    Ok(())
}
