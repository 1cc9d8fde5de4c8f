use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::services::ServeDir;

use skywatch::adapters::{
    http::{router, state::HttpState},
    media::runner::StreamRunner,
    onnx::{catalog::OnnxModelCatalog, engine::OnnxDetectorLoader},
};
use skywatch::application::{
    model_cache::ModelCache,
    services::{DetectionService, StreamService},
};

#[derive(Parser, Debug)]
#[command(name = "skywatch", about = "Object-detection dashboard over images, video files and the local camera")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Directory holding the selectable .onnx weight files.
    #[arg(long, default_value = "weights")]
    weights_dir: PathBuf,

    /// Directory with the dashboard page.
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Infrastructure adapters, shared between the services and the server.
    let catalog = Arc::new(OnnxModelCatalog::new(&args.weights_dir));
    let cache = Arc::new(ModelCache::new(Arc::new(OnnxDetectorLoader::new())));
    let runner = Arc::new(StreamRunner::new());

    // Application services.
    let detection = Arc::new(DetectionService::new(catalog.clone(), cache.clone()));
    let stream = Arc::new(StreamService::new(runner, catalog, cache));

    let state = HttpState { detection, stream };
    let app = router(state).fallback_service(ServeDir::new(&args.static_dir));

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("detection dashboard listening on http://{addr}");
    tracing::info!("serving page from {}", args.static_dir.display());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
