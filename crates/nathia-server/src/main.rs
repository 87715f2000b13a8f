mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use nathia_api::{AppStateInner, ChatPipeline, routes};
use nathia_db::Database;
use nathia_llm::gemini::moderation_safety_settings;
use nathia_llm::{ClaudeProvider, GeminiProvider, LlmProvider, RetryPolicy, RetryingProvider};
use nathia_safety::rate_limit::{CHAT_ENDPOINT, run_prune_loop};
use nathia_safety::{FailurePolicy, Moderator, RateLimitConfig, RateLimiter, RiskClassifier, WindowLimit};

use config::Config;

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nathia=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set the missing values in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Chat provider: retries with backoff, then the fallback model
    let gemini = GeminiProvider::new(&config.gemini_api_key, &config.chat_model)?
        .with_base_url(&config.gemini_api_url)
        .with_timeout(config.provider_timeout)?;
    let policy = RetryPolicy {
        max_attempts: config.llm_max_attempts,
        ..RetryPolicy::default()
    };
    let mut chat_provider = RetryingProvider::new(Arc::new(gemini), policy);
    if let Some(fallback) = &config.fallback_model {
        chat_provider = chat_provider.with_fallback_model(fallback);
    }

    // Contextual moderation runs on the lighter model with strict safety settings
    let moderation_model = config.fallback_model.as_deref().unwrap_or(&config.chat_model);
    let moderation_provider = GeminiProvider::new(&config.gemini_api_key, moderation_model)?
        .with_base_url(&config.gemini_api_url)
        .with_timeout(config.provider_timeout)?
        .with_safety_settings(moderation_safety_settings());
    let moderator = Moderator::with_provider(Arc::new(moderation_provider));

    let classifier = match &config.claude_api_key {
        Some(key) => {
            let claude = ClaudeProvider::new(key, &config.claude_model)?.with_timeout(config.provider_timeout)?;
            info!(model = %config.claude_model, "Risk analysis via Claude");
            RiskClassifier::with_provider(Arc::new(claude) as Arc<dyn LlmProvider>)
        }
        None => {
            info!("CLAUDE_API_KEY not set, risk analysis uses keyword rules only");
            RiskClassifier::keyword_only()
        }
    };

    let failure_policy = if config.rate_limit_fail_open {
        FailurePolicy::Open
    } else {
        FailurePolicy::Closed
    };
    let rate_config = RateLimitConfig::default()
        .with_limit(CHAT_ENDPOINT, WindowLimit::new(config.rate_limit_max, config.rate_limit_window))
        .with_failure_policy(failure_policy)
        .with_free_daily_quota(config.free_daily_quota);

    // Background prune of expired rate-limit events
    tokio::spawn(run_prune_loop(db.clone(), rate_config.longest_window(), PRUNE_INTERVAL));

    let pipeline = ChatPipeline::new(
        db.clone(),
        RateLimiter::new(rate_config),
        moderator,
        classifier,
        Arc::new(chat_provider),
    );

    let state = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        pipeline: Arc::new(pipeline),
    });

    let app = routes(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(chat_model = %config.chat_model, "NathIA server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("NathIA server stopped");
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
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl+C, shutting down...");
    }
}
