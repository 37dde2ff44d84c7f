use agent_dashboard_rs::{
    logging, ControlPlane, DashboardConfig, DashboardServer, DirectoryRegistry,
    RecordingDispatcher,
};
use agent_policy_rs::PolicyEngine;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    let config = DashboardConfig::from_env().context("failed to load dashboard config")?;
    logging::init(config.log_level);

    let engine = Arc::new(
        PolicyEngine::new(config.engine.clone()).context("failed to build policy engine")?,
    );
    let registry = Arc::new(DirectoryRegistry::new(
        config.agent_roots.clone(),
        config.active_window,
        config.refresh_interval,
    ));
    let plane = ControlPlane::new(engine, registry, Arc::new(RecordingDispatcher::new()));

    let server = DashboardServer::start(config.bind, Arc::new(plane))?;
    info!(
        address = %server.address(),
        roots = config.agent_roots.len(),
        "agent dashboard listening"
    );
    server.wait();
    Ok(())
}
