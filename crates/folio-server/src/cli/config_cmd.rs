use crate::cli::ConfigCommands;
use crate::config::FolioConfig;
use anyhow::Result;
use std::path::Path;

pub fn run(cmd: ConfigCommands, config_path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path),
        ConfigCommands::Show => show(config_path),
    }
}

fn validate(config_path: &Path) -> Result<()> {
    let config = FolioConfig::load(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", config_path.display(), e))?
        .with_env_overrides();

    let errors = config.validate();
    if !errors.is_empty() {
        println!("Validation errors in {}:", config_path.display());
        for e in &errors {
            println!("  - {}", e);
        }
        anyhow::bail!("{} is invalid", config_path.display());
    }

    println!("{} is valid.", config_path.display());
    Ok(())
}

fn show(config_path: &Path) -> Result<()> {
    let mut config = FolioConfig::load_or_default(config_path)?.with_env_overrides();
    if config.cms.token.is_some() {
        config.cms.token = Some("<redacted>".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
