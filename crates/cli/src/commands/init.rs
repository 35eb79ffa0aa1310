//! `chorus init` — Write a default config and descriptor file.

use std::path::PathBuf;

use chorus_actions::DescriptorStore;
use chorus_actions::builtin::default_descriptors;
use chorus_config::HostConfig;

pub async fn run(config_path: Option<PathBuf>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.unwrap_or_else(|| HostConfig::config_dir().join("config.toml"));

    println!("Chorus — Setup");
    println!("==============\n");

    if config_path.exists() && !force {
        println!("  Config exists: {} (use --force to overwrite)", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, HostConfig::default_toml())?;
        println!("  Wrote config: {}", config_path.display());
    }

    let config = HostConfig::load_from(&config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let store = DescriptorStore::new(config.host.actions_file());
    if store.path().exists() && !force {
        println!("  Descriptors exist: {}", store.path().display());
    } else {
        store.save(&default_descriptors())?;
        println!("  Wrote descriptors: {}", store.path().display());
    }

    let plugin_dir = config.host.plugin_dir();
    std::fs::create_dir_all(&plugin_dir)?;
    println!("  Plugin dir: {}", plugin_dir.display());

    println!("\n  Next: set CHORUS_API_KEY and run `chorus chat`");
    Ok(())
}
