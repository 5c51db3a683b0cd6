//! Configuration view and validation commands: `remedy config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;

fn print_toml(toml: &remedy::remedy_config::RemedyToml) {
    let p = &toml.pipeline;
    let names: Vec<String> = p.categories.iter().map(|c| format!("\"{c}\"")).collect();
    println!("[pipeline]");
    println!("  max_steps = {}", p.max_steps);
    println!("  max_attempts = {}", p.max_attempts);
    println!("  pass_threshold = {}", p.pass_threshold);
    println!("  retry_floor = {}", p.retry_floor);
    println!("  categories = [{}]", names.join(", "));
    println!();

    let v = &toml.verify;
    println!("[verify]");
    println!("  syntax_timeout_secs = {}", v.syntax_timeout_secs);
    println!("  import_timeout_secs = {}", v.import_timeout_secs);
    println!("  lint_timeout_secs = {}", v.lint_timeout_secs);
    println!("  test_timeout_secs = {}", v.test_timeout_secs);
    println!();
}

pub fn cmd_config(
    project_dir: &Path,
    command: Option<ConfigCommands>,
    max_steps: Option<u32>,
) -> Result<()> {
    use remedy::remedy_config::{CONFIG_FILE, RemedyConfig, RemedyToml};

    let remedy_dir = project_dir.join(".remedy");
    let config_path = remedy_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Remedy Configuration");
            println!("====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_toml(&RemedyToml::load(&config_path)?);
            } else {
                println!("No remedy.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                print_toml(&RemedyToml::default());
                println!("Run 'remedy config init' to create a remedy.toml file.");
                println!();
            }

            // Show effective values (including env overrides)
            let config = RemedyConfig::with_cli_args(project_dir.to_path_buf(), max_steps)?;
            println!("Effective values (with env/CLI overrides):");
            println!("  max_steps = {}", config.max_steps());
            println!("  max_attempts = {}", config.max_attempts());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No remedy.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = RemedyToml::load(&config_path)?;
            let errors = toml.validate();

            if errors.is_empty() {
                println!("Configuration is valid.");
                println!();
            } else {
                println!("Configuration errors:");
                for error in &errors {
                    println!("  - {}", error);
                }
                println!();
                anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("remedy.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !remedy_dir.exists() {
                std::fs::create_dir_all(&remedy_dir)?;
            }

            RemedyToml::default().save(&config_path)?;

            println!("Created remedy.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pipeline] max_steps, max_attempts, pass_threshold, retry_floor, categories");
            println!("  - [verify] per-stage timeouts in seconds");
            println!();
        }
    }

    Ok(())
}
