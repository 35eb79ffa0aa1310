//! `chorus actions` — Discover actions and list their descriptors.

use chorus_actions::{DescriptorStore, ModuleCatalog, discover};
use chorus_config::HostConfig;

pub async fn run(config: HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = DescriptorStore::new(config.host.actions_file());
    let catalog = ModuleCatalog::with_builtins(config.host.plugin_dir());
    let descriptors = discover(&store, &catalog);

    println!("Actions ({})", store.path().display());
    println!("  {:<20} {:>8}  {:<8} module", "name", "priority", "default");
    for d in &descriptors {
        let default = if d.active_by_default { "on" } else { "off" };
        println!("  {:<20} {:>8}  {:<8} {}", d.name, d.priority, default, d.module);
    }

    println!();
    println!("Module kinds: {}", catalog.kinds().join(", "));
    println!("Plugin dir:   {}", catalog.plugin_dir().display());
    Ok(())
}
