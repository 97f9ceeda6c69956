//! Configuration view and validation commands - `stepgate config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use stepgate::config::{CONFIG_FILE, Config, STEPGATE_DIR, StepgateToml};

    let stepgate_dir = project_dir.join(STEPGATE_DIR);
    let config_path = stepgate_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stepgate Configuration");
            println!("======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                StepgateToml::load(&config_path)?
            } else {
                println!("No stepgate.toml found at {}", config_path.display());
                println!("Using default configuration:");
                StepgateToml::default()
            };
            println!();
            print!("{}", toml.to_toml()?);
            println!();

            println!("Effective values (with env overrides):");
            let config = Config::new(project_dir.to_path_buf())?;
            println!("  store = \"{}\"", config.store_dir().display());
            println!("  shell = \"{}\"", config.shell());
            println!("  working_dir = \"{}\"", config.working_dir().display());
            println!();

            if !config_path.exists() {
                println!("Run 'stepgate config init' to create a stepgate.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No stepgate.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StepgateToml::load(&config_path)?;
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
                println!("stepgate.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !stepgate_dir.exists() {
                std::fs::create_dir_all(&stepgate_dir)?;
            }

            StepgateToml::default().save(&config_path)?;

            println!("Created stepgate.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [validation] shell, command_timeout_secs, working_dir");
            println!("  - [retry] max_attempts_ceiling");
            println!("  - [checkpoints] mandatory_by_default");
            println!("  - [quality_gate] on_block");
            println!();
        }
    }

    Ok(())
}
