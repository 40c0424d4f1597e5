use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use railyard_api::agent::{OpenAiGenerator, ReplyAgent, ReplyQueue, run_reply_worker};
use railyard_api::auth::{AppState, AppStateInner};
use railyard_api::routes::router;
use railyard_db::Database;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "railyard=debug,railyard_api=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("RAILYARD_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: RAILYARD_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path: PathBuf = std::env::var("RAILYARD_DB_PATH")
        .unwrap_or_else(|_| "railyard.db".into())
        .into();
    let host = std::env::var("RAILYARD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RAILYARD_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let cookie_secure = std::env::var("RAILYARD_COOKIE_SECURE")
        .map(|v| matches!(v.as_str(), "1" | "true"))
        .unwrap_or(false);

    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let ai_base_url =
        std::env::var("RAILYARD_AI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".into());
    let ai_model = std::env::var("RAILYARD_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    if api_key.is_none() {
        warn!("OPENAI_API_KEY not set, @ai mentions will not be answered");
    }

    // Init database
    let db = Arc::new(Database::open(&db_path)?);

    // Automated replies run off the request path
    let (replies, jobs) = ReplyQueue::new();
    let generator = OpenAiGenerator::new(api_key, ai_base_url, ai_model)?;
    let agent = Arc::new(ReplyAgent::new(db.clone(), Arc::new(generator)));
    tokio::spawn(run_reply_worker(jobs, agent));

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        cookie_secure,
        replies,
    });

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Railyard listening on {}", addr);

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
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            warn!("Failed to install SIGTERM handler, waiting for Ctrl+C only");
            ctrl_c.await.ok();
            return;
        };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
