use anyhow::Context;
use iot_rule_rs::{api, EngineConfig, RedisBus, RedisRegistry, RuleEngine};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env().context("invalid rule engine configuration")?;
    let http_addr = config.http_addr.clone();

    let bus = RedisBus::connect(&config.redis_url)
        .await
        .context("failed to connect event bus")?;
    let registry = RedisRegistry::connect(&config.redis_url, &config.registry_prefix)
        .await
        .context("failed to connect rule registry")?;

    // 创建规则引擎
    let engine = Arc::new(RuleEngine::new(config, Arc::new(registry), Arc::new(bus)));
    engine.start().await.context("failed to start rule engine")?;
    let recovered = engine.recovery().await.context("rule recovery failed")?;
    info!(recovered, "rules recovered");

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!(%http_addr, "REST server starting");
    axum::serve(listener, api::router(engine.clone()))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("REST server failed")?;

    engine.stop().await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
