use anyhow::{Context, Result};
use sitegraph::config::Config;
use std::path::PathBuf;

pub fn init_config(path: PathBuf, force: bool) -> Result<()> {
    let config_path = path.join("sitegraph.toml");
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let toml_content = format!("# Sitegraph configuration\n\n{}", Config::default().to_toml()?);

    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    std::fs::write(&config_path, toml_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created configuration file: {}", config_path.display());

    Ok(())
}
