mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{Method, header::CONTENT_TYPE};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use slides_storage::{IMAGE_BUCKET, ImagePolicy, LocalStore, ObjectStore, SupabaseStorage};

use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slides_server=debug,slides_storage=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("SLIDES_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SLIDES_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let storage_kind = std::env::var("SLIDES_STORAGE").unwrap_or_else(|_| "local".into());

    let (store, images_dir): (Arc<dyn ObjectStore>, Option<PathBuf>) = match storage_kind.as_str() {
        "local" => {
            let dir: PathBuf = std::env::var("SLIDES_STORAGE_DIR")
                .unwrap_or_else(|_| "./slide-images".into())
                .into();
            let public_url = std::env::var("SLIDES_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}/images", port));
            let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.clone(), public_url).await?);
            (store, Some(dir))
        }
        "supabase" => {
            let url = std::env::var("SLIDES_BACKEND_URL").unwrap_or_default();
            let service_key = std::env::var("SLIDES_BACKEND_SERVICE_KEY").unwrap_or_default();
            if url.is_empty() || service_key.is_empty() {
                eprintln!("FATAL: SLIDES_BACKEND_URL and SLIDES_BACKEND_SERVICE_KEY must be set");
                eprintln!("       when SLIDES_STORAGE=supabase.");
                std::process::exit(1);
            }
            info!("Storing images in bucket '{}' at {}", IMAGE_BUCKET, url);
            let store: Arc<dyn ObjectStore> = Arc::new(SupabaseStorage::new(url, service_key, IMAGE_BUCKET));
            (store, None)
        }
        other => anyhow::bail!("SLIDES_STORAGE must be 'local' or 'supabase', got '{}'", other),
    };

    let policy = ImagePolicy::default();
    info!("Accepting {}", policy);

    let state = AppState { store, policy };

    // Browser clients post from the app's own origin, which may differ in dev
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(false);

    let app = routes::router(state, images_dir.as_deref())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Slides server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
