use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use xrhub_core::session_config::{Role, SessionConfiguration};
use xrhub_reality::{RealityService, RealityServiceConfig};
use xrhub_services::{
    EntitySubscriptionService, FocusService, PermissionService, ViewportService, VisibilityService,
};
use xrhub_session::connect::LoopbackConnectStrategy;
use xrhub_session::manager::SessionManager;
use xrhub_telemetry::{init_telemetry, TelemetryConfig};

/// Manager host: arbitrates reality viewers for sessions connecting over
/// the debug socket.
#[derive(Parser, Debug)]
#[command(name = "xrhub", version)]
struct Args {
    /// Debug-socket listen port.
    #[arg(long, default_value_t = 9092)]
    port: u16,

    /// Default log level (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Reality presented at startup.
    #[arg(long, default_value = "reality:empty")]
    default_reality: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: Vec::new(),
        json_output: args.json_logs,
    });

    tracing::info!("starting xrhub manager");

    let mut configuration = SessionConfiguration::new(Role::Manager);
    configuration.name = Some("xrhub".into());
    let manager = SessionManager::new(configuration);

    let reality = RealityService::new(
        Arc::clone(&manager),
        RealityServiceConfig {
            default_uri: args.default_reality.clone(),
        },
        RealityService::default_loaders(),
    );
    reality.attach();

    let focus = FocusService::new(Arc::clone(&manager));
    focus.attach();
    reality.set_focus_source(Arc::clone(&focus) as Arc<dyn xrhub_reality::FocusSource>);

    let visibility = VisibilityService::new(Arc::clone(&manager));
    visibility.attach();

    let viewport = ViewportService::new(Arc::clone(&manager));
    viewport.set_reality_service(Arc::clone(&reality));
    viewport.attach();

    let permissions = PermissionService::new(Arc::clone(&manager));
    permissions.attach();
    let entities = EntitySubscriptionService::new(Arc::clone(&manager), Arc::clone(&permissions));
    entities.attach();

    manager
        .connect(&LoopbackConnectStrategy)
        .await
        .context("manager self-connect failed")?;

    // The manager's own session presents the default reality.
    let own_session = manager
        .managed_sessions()
        .first()
        .map(|s| s.id.clone())
        .context("no loopback session after connect")?;
    reality
        .request_presentation(&own_session, None)
        .await
        .context("presenting default reality failed")?;
    tracing::info!(uri = %args.default_reality, "default reality presented");

    let server = xrhub_server::start(
        xrhub_server::ServerConfig {
            port: args.port,
            ..Default::default()
        },
        Arc::clone(&manager),
    )
    .await
    .context("debug socket host failed to start")?;
    tracing::info!(port = server.port, "xrhub manager ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    server.shutdown();
    manager.port().close();
    Ok(())
}
