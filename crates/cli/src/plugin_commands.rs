//! CLI commands for bundled plugins.

use std::path::Path;

use clap::Subcommand;

use chathook_plugins::{NoopEngine, PluginHost, bundled};

#[derive(Subcommand)]
pub enum PluginAction {
    /// List bundled plugins and the commands they register.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_plugins(action: PluginAction, config: Option<&Path>) -> anyhow::Result<()> {
    let (config, _) = crate::config_commands::load(config)?;

    match action {
        PluginAction::List { json } => {
            let mut host = PluginHost::new(config.clone(), NoopEngine);
            let mut entries: Vec<serde_json::Value> = Vec::new();

            for plugin in bundled::all() {
                let name = plugin.name().to_string();
                let enabled = config.plugins.is_enabled(&name);
                let id = host.load(plugin.as_ref())?;
                let commands: Vec<_> = host
                    .registry()
                    .owned_by(id)
                    .into_iter()
                    .filter_map(|h| host.registry().get(h))
                    .filter_map(|h| h.command.clone())
                    .collect();

                if json {
                    entries.push(serde_json::json!({
                        "name": name,
                        "enabled": enabled,
                        "commands": commands.iter().map(|c| serde_json::json!({
                            "name": c.name,
                            "args": c.args,
                            "description": c.description,
                        })).collect::<Vec<_>>(),
                    }));
                } else {
                    let status = if enabled {
                        "✓"
                    } else {
                        "✗"
                    };
                    println!("  {status} {name}");
                    for c in &commands {
                        println!("      /{} {}  {}", c.name, c.args, c.description);
                    }
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
        },
    }

    Ok(())
}
