//! Configuration view and validation commands: `phasekeep config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use phasekeep::config::{CONFIG_FILE, PhasekeepToml};
    use phasekeep::init::get_store_dir;

    let store_dir = get_store_dir(project_dir);
    let config_path = store_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("phasekeep Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                PhasekeepToml::load(&config_path)?
            } else {
                println!("No phasekeep.toml found at {}", config_path.display());
                println!("Using default configuration.");
                PhasekeepToml::default()
            };
            println!();

            println!("[project]");
            println!("  prefix = \"{}\"", toml.project.prefix);
            println!();

            println!("[execution]");
            println!("  max_wip = {}", toml.execution.max_wip);
            println!("  max_exclusive = {}", toml.execution.max_exclusive);
            println!("  lock_timeout_secs = {}", toml.execution.lock_timeout_secs);
            println!(
                "  default_pipeline = \"{}\"",
                toml.execution.default_pipeline
            );
            println!();

            let pipelines = toml.pipeline_set();
            for name in pipelines.names() {
                let Some(pipeline) = pipelines.get(name) else {
                    continue;
                };
                let marker = if name == pipelines.default_name() {
                    " (default)"
                } else {
                    ""
                };
                println!("[pipelines.{}]{}", name, marker);
                let describe = |phases: &[phasekeep::pipeline::PhaseConfig]| {
                    phases
                        .iter()
                        .map(|p| {
                            if p.destructive {
                                format!("{}*", p.name)
                            } else {
                                p.name.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" -> ")
                };
                println!("  pre_phases: {}", describe(pipeline.pre_phases.as_slice()));
                println!("  phases:     {}", describe(pipeline.phases.as_slice()));
                println!();
            }
            println!("(* = destructive, runs exclusively)");
            println!();

            if !config_path.exists() {
                println!("Run 'phasekeep config init' to create a phasekeep.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No phasekeep.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = PhasekeepToml::load(&config_path)?;
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
                println!(
                    "phasekeep.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !store_dir.exists() {
                std::fs::create_dir_all(&store_dir)?;
            }

            PhasekeepToml::default().save(&config_path)?;

            println!("Created phasekeep.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] prefix");
            println!("  - [execution] max_wip, max_exclusive, lock_timeout_secs, default_pipeline");
            println!("  - [pipelines.<name>] pre_phases and phases");
            println!();
        }
    }

    Ok(())
}
