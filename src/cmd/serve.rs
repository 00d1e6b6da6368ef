//! Progress and prompt server: `cartpilot serve`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use cartpilot::config::PilotConfig;
use cartpilot::interrupt::InterruptBroker;
use cartpilot::progress::ProgressRegistry;
use cartpilot::replay::Scenario;
use cartpilot::server::{AppState, ServerConfig, start_server};
use cartpilot::session::SessionContext;

use super::replay::run_scenario;

pub async fn cmd_serve(
    project_dir: &Path,
    verbose: bool,
    port: Option<u16>,
    dev: bool,
    replay: Option<PathBuf>,
) -> Result<()> {
    let config = PilotConfig::with_cli_args(project_dir.to_path_buf(), verbose, None, port)?;
    let broker = Arc::new(InterruptBroker::new());
    let registry = Arc::new(ProgressRegistry::new());

    if let Some(path) = replay {
        let scenario = Scenario::load(&path)?;
        let session_id = Uuid::new_v4().to_string();
        let session = SessionContext::new(
            session_id.clone(),
            config.session_timeout(),
            Arc::clone(&broker),
            registry.reporter(&session_id),
        );
        println!(
            "Replaying {} as session {}",
            path.display(),
            console::style(&session_id).cyan()
        );
        println!(
            "  Watch: ws://{}:{}/ws/sessions/{}",
            config.toml.server.host, config.toml.server.port, session_id
        );

        let config = config.clone();
        tokio::spawn(async move {
            let outcome = run_scenario(&config, &scenario, &session, None).await;
            tracing::info!(
                session_id = %session.session_id,
                success = outcome.success,
                message = %outcome.message,
                "Replay session finished"
            );
        });
    }

    let state = Arc::new(AppState::new(broker, registry));
    start_server(
        ServerConfig {
            host: config.toml.server.host.clone(),
            port: config.toml.server.port,
            dev_mode: dev,
        },
        state,
    )
    .await
}
