use anyhow::{Context, Result};
use timeglow_core::telemetry::{init_telemetry, TelemetryConfig};
use timeglow_core::PipelineConfig;
use timeglow_worker::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "timeglow=info,tower_http=info")
    // - LOG_FORMAT: "json" for structured output
    init_telemetry(TelemetryConfig::from_env());

    tracing::info!("timeglow-worker starting...");

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    let pipeline = Pipeline::from_config(&config)
        .await
        .context("Failed to build pipeline")?;

    // Continue whatever a previous process left unfinished
    let resumed = pipeline
        .runner
        .resume_incomplete()
        .await
        .context("Failed to resume incomplete jobs")?;
    tracing::info!(resumed = resumed.len(), "startup recovery done");

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "event intake listening");

    axum::serve(listener, pipeline.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    if let Err(e) = pipeline.runner.shutdown().await {
        tracing::warn!(error = %e, "in-flight jobs left for the next start");
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
