pub mod api;
pub mod app_state;
pub mod config;
pub mod convert;
pub mod job;
pub mod presets;
pub mod upload;
pub mod utils;

use anyhow::Context;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{HeaderValue, header};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{ApiError, log_request_errors};
pub use app_state::AppState;
pub use config::Config;
pub use convert::{ConversionPlan, ConversionRequest, ConvertError};
pub use job::{Job, JobCounts, JobRegistry, JobStatus};
pub use presets::{OutputFormat, find_format, output_formats};
pub use upload::UploadedFile;

/// Room for the text fields and multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    let Some(origins) = config.cors_origins() else {
        return Ok(cors.allow_origin(Any));
    };

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

/// All routes with their layers; the state is shared through an `Extension`.
pub fn router(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let body_limit = usize::try_from(config.max_file_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    let mut app = Router::new()
        .route("/output-formats", get(api::list_output_formats))
        .route(
            "/convert",
            post(api::convert).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/progress/{job_id}", get(api::progress))
        .route("/download/{job_id}", get(api::download))
        .route("/check-file/{filename}", get(api::check_file))
        .route("/download-all", get(api::download_all))
        .route("/waitlist", get(api::waitlist));

    if let Some(public_dir) = &config.public_dir {
        info!(?public_dir, "Serving static files");
        app = app.fallback_service(ServeDir::new(public_dir));
    }

    Ok(app
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config)?)
        .layer(Extension(state)))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let state = AppState::new(&config)
        .await
        .context("Failed to prepare upload and output directories")?;
    if let Some(ttl) = config.job_ttl() {
        state.start_reaper(ttl);
    }

    let app = router(state, &config)?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}, is the port already in use?"))?;
    info!(
        %addr,
        upload_dir = ?config.upload_dir,
        output_dir = ?config.output_dir,
        permits = config.permits,
        "Media converter listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
