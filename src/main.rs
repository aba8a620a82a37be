use clap::Parser;
use fleetd::cli::{Cli, Commands};
use fleetd::{ClientId, DaemonConfig, FleetError, FleetRegistry, ServerConfig};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            run(config).await?;
        }
        Commands::Check { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            let settings = config.supervisor_settings();
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("drop_privileges (effective): {}", settings.drop_privileges);
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fleetd={level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .compact(),
        )
        .init();
}

async fn run(config: DaemonConfig) -> Result<(), FleetError> {
    info!("fleetd starting (version {})", env!("CARGO_PKG_VERSION"));

    let settings = config.supervisor_settings();
    let tick = settings.tick;
    let registry = Arc::new(FleetRegistry::new(settings));
    registry.startup();

    let daemon = ClientId::new();
    for server in config.servers {
        let registry = Arc::clone(&registry);
        let name = server.internal_name.clone();
        match tokio::task::spawn_blocking(move || autostart(&registry, daemon, server)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = %name, "autostart failed: {e}"),
            Err(e) => error!(server = %name, "autostart task failed: {e}"),
        }
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut housekeeping = tokio::time::interval(tick);

    loop {
        tokio::select! {
            _ = sigterm.recv() => { info!("received SIGTERM"); break; }
            _ = sigint.recv() => { info!("received SIGINT"); break; }
            _ = housekeeping.tick() => {
                let registry = Arc::clone(&registry);
                if let Err(e) = tokio::task::spawn_blocking(move || end_finished(&registry)).await {
                    warn!("housekeeping task failed: {e}");
                }
            }
        }
    }

    info!("fleetd shutting down");
    let registry = Arc::clone(&registry);
    if let Err(e) = tokio::task::spawn_blocking(move || registry.shutdown()).await {
        error!("shutdown task failed: {e}");
    }
    Ok(())
}

/// allocate -> begin -> attach, the same path a client command takes
fn autostart(
    registry: &FleetRegistry,
    client: ClientId,
    server: ServerConfig,
) -> Result<(), FleetError> {
    let mut handle = registry.allocate(client)?;
    handle.server_mut().begin(server)?;
    registry.attach(handle);
    Ok(())
}

fn end_finished(registry: &FleetRegistry) {
    for mut handle in registry.collect_finished() {
        let condition = handle.server_mut().end();
        info!(
            server_id = handle.server().id(),
            server = %handle.server().name(),
            "{condition}"
        );
    }
}
