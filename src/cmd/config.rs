//! Configuration view and validation commands: `cartpilot config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use cartpilot::config::{CONFIG_DIR, CONFIG_FILE, PilotConfig, PilotToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("cartpilot Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include env overrides on top of the file.
            let config = PilotConfig::new(project_dir.to_path_buf())?;
            print_toml(&config.toml);

            if !config_path.exists() {
                println!("Run 'cartpilot config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = PilotToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            PilotToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [orchestrator] max_steps, planner_retries, tool_timeout_secs");
            println!("  - [loop_detection] window_size, threshold");
            println!("  - [recovery] candidate_paths, total_budget_secs");
            println!("  - [interrupts] input_timeout_secs, require_confirmation");
            println!("  - [[verification.gates]] pattern, gate");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &cartpilot::config::PilotToml) {
    let o = &toml.orchestrator;
    println!("[orchestrator]");
    println!("  max_steps = {}", o.max_steps);
    println!("  planner_retries = {}", o.planner_retries);
    println!("  planner_backoff_ms = {}", o.planner_backoff_ms);
    println!("  tool_timeout_secs = {}", o.tool_timeout_secs);
    println!("  session_timeout_secs = {}", o.session_timeout_secs);
    println!("  max_total_failures = {}", o.max_total_failures);
    println!("  max_recoveries = {}", o.max_recoveries);
    println!();

    println!("[loop_detection]");
    println!("  window_size = {}", toml.loop_detection.window_size);
    println!("  threshold = {}", toml.loop_detection.threshold);
    println!();

    let r = &toml.recovery;
    println!("[recovery]");
    println!("  candidate_paths = {:?}", r.candidate_paths);
    println!("  attempt_timeout_secs = {}", r.attempt_timeout_secs);
    println!("  total_budget_secs = {}", r.total_budget_secs);
    println!();

    let i = &toml.interrupts;
    println!("[interrupts]");
    println!("  input_timeout_secs = {}", i.input_timeout_secs);
    println!("  require_confirmation = {}", i.require_confirmation);
    println!("  confirm_tools = {:?}", i.confirm_tools);
    println!();

    println!("[verification]");
    for rule in &toml.verification.gates {
        println!("  \"{}\" -> {}", rule.pattern, rule.gate);
    }
    println!();

    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!();
}
