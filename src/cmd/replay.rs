//! Scripted dry runs: `cartpilot replay <scenario.json>`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use uuid::Uuid;

use cartpilot::config::PilotConfig;
use cartpilot::interrupt::{InterruptBroker, PromptTransport};
use cartpilot::orchestrator::{Orchestrator, OrchestratorSettings, TaskOutcome, TaskStatus};
use cartpilot::progress::ProgressReporter;
use cartpilot::replay::{Scenario, ScriptedResponder};
use cartpilot::session::SessionContext;
use cartpilot::ui::TerminalProgress;
use cartpilot::ui::icons::{CHECK, CROSS};

pub async fn cmd_replay(
    project_dir: &Path,
    verbose: bool,
    scenario_path: &Path,
    max_steps: Option<u32>,
    json: bool,
) -> Result<()> {
    let config = PilotConfig::with_cli_args(project_dir.to_path_buf(), verbose, None, None)?;
    let scenario = Scenario::load(scenario_path)?;

    let session = SessionContext::new(
        Uuid::new_v4().to_string(),
        config.session_timeout(),
        Arc::new(InterruptBroker::new()),
        Arc::new(ProgressReporter::new()),
    );
    if !json {
        session
            .progress
            .connect(Arc::new(TerminalProgress::new(verbose)))
            .await;
    }

    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = run_scenario(&config, &scenario, &session, max_steps).await;

    if json {
        let rendered =
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        println!("{}", rendered);
    } else {
        print_outcome(&outcome);
    }

    if !outcome.success {
        anyhow::bail!("Task did not complete: {}", outcome.message);
    }
    Ok(())
}

/// Drive `scenario` through a real orchestrator bound to `session`.
///
/// `max_steps` overrides both the scenario and the config file.
pub async fn run_scenario(
    config: &PilotConfig,
    scenario: &Scenario,
    session: &SessionContext,
    max_steps: Option<u32>,
) -> TaskOutcome {
    let mut task = scenario.task(config.toml.orchestrator.max_steps);
    if let Some(max_steps) = max_steps {
        task.max_steps = max_steps;
    }

    if !scenario.answers.is_empty() {
        let responder: Arc<dyn PromptTransport> = Arc::new(ScriptedResponder::new(
            &session.broker,
            scenario.answers.clone(),
        ));
        session
            .broker
            .register_transport(&session.session_id, responder);
    }

    let mut orchestrator = Orchestrator::new(
        Arc::new(scenario.planner()),
        Arc::new(scenario.surface()),
        OrchestratorSettings::from(&config.toml),
    );
    if let Some(verifier) = scenario.verifier() {
        orchestrator = orchestrator.with_verifier(Arc::new(verifier));
    }
    orchestrator.execute_task(&task, session).await
}

fn print_outcome(outcome: &TaskOutcome) {
    let details = &outcome.details;
    println!();
    match outcome.status {
        TaskStatus::Completed => println!("{}{}", CHECK, style(&outcome.message).green().bold()),
        TaskStatus::Failed | TaskStatus::Cancelled => {
            println!("{}{}", CROSS, style(&outcome.message).red().bold())
        }
    }
    println!(
        "  {} steps, {} failures, {} recoveries",
        details.steps_taken,
        details.total_failures,
        details.recoveries.len()
    );
    if let Some(url) = &details.final_url {
        println!("  Final URL: {}", style(url).cyan());
    }
    for entry in &details.history {
        let mark = if entry.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "    {:>3} {} {} {}",
            entry.step,
            mark,
            entry.tool,
            style(&entry.message).dim()
        );
    }
    println!();
}
