use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use std::process::Command;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, ENV_ENHANCED_PDF_PROCESSING, ENV_VECTOR_DB_PROVIDER, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Initialize configuration file")]
    Init {
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration, including environment overrides")]
    Show,
    #[command(about = "Show configuration file path")]
    Path,
    #[command(about = "Edit configuration file")]
    Edit,
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(format),
        ConfigCommand::Path => handle_path(),
        ConfigCommand::Edit => handle_edit(formatter.as_ref()),
    }
}

fn config_path() -> Result<PathBuf> {
    Config::config_path().ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

fn handle_init(force: bool, formatter: &dyn Formatter) -> Result<()> {
    let path = config_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default().save().context("failed to create config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

fn handle_show(format: OutputFormat) -> Result<()> {
    let config = Config::load()?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Config: {}", path.display());
        } else {
            println!("# Config: defaults ({} not found)", path.display());
        }
    }
    for var in [ENV_VECTOR_DB_PROVIDER, ENV_ENHANCED_PDF_PROCESSING] {
        if let Ok(value) = std::env::var(var) {
            println!("# {}={}", var, value);
        }
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

fn handle_path() -> Result<()> {
    let path = config_path()?;
    if path.exists() {
        println!("Config (active): {}", path.display());
    } else {
        println!("Config (would be): {}", path.display());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        }
    }

    Ok(())
}

fn handle_edit(formatter: &dyn Formatter) -> Result<()> {
    let path = config_path()?;
    if !path.exists() {
        Config::default().save().context("failed to create config")?;
        println!(
            "{}",
            formatter.format_message(&format!("Created config at: {}", path.display()))
        );
    }

    let editor = std::env::var("EDITOR")
        .unwrap_or_else(|_| std::env::var("VISUAL").unwrap_or_else(|_| "vim".into()));

    Command::new(&editor)
        .arg(&path)
        .status()
        .context(format!("failed to open editor: {}", editor))?;

    Ok(())
}
