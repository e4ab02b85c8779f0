//! The parlance server binary.
//!
//! Serves the voice pipeline over WebSocket (default) or, with `--stdio`,
//! over a single stdin/stdout session for parent-process integration. All
//! diagnostics go to stderr so stdout stays a clean protocol channel in
//! stdio mode.

use std::sync::Arc;

use parlance::backend::openai::OpenAiLlm;
use parlance::config::OrchestratorConfig;
use parlance::pipeline::Pipeline;
use parlance::wire::stdio::run_stdio_session;
use parlance::wire::ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut stdio_mode = false;
    let mut config_path = OrchestratorConfig::default_path();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdio" => stdio_mode = true,
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = path.into();
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let config = OrchestratorConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    if config.openai.api_key.is_empty() {
        anyhow::bail!(
            "no LLM credentials: set OPENAI_API_KEY or put api_key in {}",
            config_path.display()
        );
    }

    let llm = Arc::new(OpenAiLlm::new(config.openai.clone()));
    let pipeline = Arc::new(Pipeline::new(llm, config.pipeline.clone()));
    tracing::info!(
        model = %config.openai.model,
        "pipeline ready (clients provide STT/TTS via capabilities)"
    );

    if stdio_mode {
        run_stdio_session(pipeline)
            .await
            .map_err(|e| anyhow::anyhow!("stdio session failed: {e}"))?;
        tracing::info!("stdin closed; shutting down");
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %config.server.bind_addr, "listening for websocket clients");
    axum::serve(listener, ws::router(pipeline)).await?;
    Ok(())
}
