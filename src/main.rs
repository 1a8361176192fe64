use platform_api::config::Config;
use platform_api::health::{SERVICE, VERSION};
use platform_api::{Server, telemetry};
use tracing::instrument::WithSubscriber;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    let telemetry = telemetry::init(&config.observability);

    run(config).with_subscriber(telemetry.dispatch().clone()).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        service = SERVICE,
        version = VERSION,
        addr = %config.server.addr,
        port = config.server.port,
        provisioning = %config.provisioning.endpoint(),
        log_level = %config.observability.log_level,
        "starting platform-api"
    );

    // Loaded and validated, but nothing consumes these yet.
    if config.auth.enabled {
        warn!(issuer = %config.auth.issuer_url, "AUTH_ENABLED is set but authentication is not implemented");
    }
    if config.observability.tracing_enabled {
        warn!(endpoint = %config.observability.tracing_endpoint, "TRACING_ENABLED is set but trace export is not implemented");
    }
    if config.observability.metrics_enabled {
        warn!(port = config.observability.metrics_port, "METRICS_ENABLED is set but no metrics endpoint is served");
    }

    let server = Server::bind(&config.server).await?;
    server.serve(platform_api::app()).await?;

    info!("server exited gracefully");
    Ok(())
}
