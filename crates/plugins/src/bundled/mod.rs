//! Plugins shipped with the host.

pub mod browse;
pub mod nowplaying;
pub mod uptime;

use {chathook_common::PluginId, tracing::info};

use crate::{api::Plugin, error::Result, host::PluginHost};

pub use {browse::BrowsePlugin, nowplaying::NowPlayingPlugin, uptime::UptimePlugin};

pub fn all() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(BrowsePlugin),
        Box::new(UptimePlugin),
        Box::new(NowPlayingPlugin),
    ]
}

/// Load every bundled plugin not listed in `plugins.disabled`.
pub fn load_enabled(host: &mut PluginHost) -> Result<Vec<PluginId>> {
    let mut loaded = Vec::new();
    for plugin in all() {
        if !host.config().plugins.is_enabled(plugin.name()) {
            info!(plugin = plugin.name(), "bundled plugin disabled");
            continue;
        }
        loaded.push(host.load(plugin.as_ref())?);
    }
    Ok(loaded)
}
