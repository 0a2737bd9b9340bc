//! `nowplaying` plugin: `/np` asks each configured player in turn what it is
//! playing and announces the first answer.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    chathook_common::{BufferRef, ContextData, Event, HandlerAction},
    tracing::debug,
};

use crate::api::{Plugin, PluginApi};

/// `|`-separated player command lines, tried in order.
pub const PLAYERS_OPTION: &str = "nowplaying.players";

const PLAYER_TIMEOUT: Duration = Duration::from_secs(3);

pub struct NowPlayingPlugin;

struct Attempt {
    buffer: BufferRef,
    players: Arc<Vec<String>>,
    index: usize,
}

impl Plugin for NowPlayingPlugin {
    fn name(&self) -> &str {
        "nowplaying"
    }

    fn register(&self, api: &mut PluginApi<'_>) -> Result<()> {
        api.hook_command(
            "np",
            "announce the track currently playing",
            "",
            |api, _, _| {
                let buffer = api.current_buffer();
                let players = parse_players(api.config(PLAYERS_OPTION).unwrap_or_default());
                if players.is_empty() {
                    api.print(
                        &buffer,
                        "np: no player configured, set option \"nowplaying.players\"",
                    );
                    return Ok(HandlerAction::OkEat);
                }
                try_player(api, Attempt {
                    buffer,
                    players: Arc::new(players),
                    index: 0,
                })?;
                Ok(HandlerAction::OkEat)
            },
        )?;
        Ok(())
    }
}

fn parse_players(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn try_player(api: &mut PluginApi<'_>, attempt: Attempt) -> Result<()> {
    let Some(player) = attempt.players.get(attempt.index).cloned() else {
        api.print(&attempt.buffer, "np: no player is playing anything");
        return Ok(());
    };
    debug!(player = %player, index = attempt.index, "asking player");
    api.spawn_process(&player, PLAYER_TIMEOUT, on_player_exit, ContextData::new(attempt))?;
    Ok(())
}

fn on_player_exit(
    api: &mut PluginApi<'_>,
    ctx: &ContextData,
    event: &Event,
) -> Result<HandlerAction> {
    let (Some(report), Some(attempt)) = (event.process(), ctx.get::<Attempt>()) else {
        return Ok(HandlerAction::Ok);
    };
    let track = report.stdout.lines().next().unwrap_or_default().trim();
    if report.success() && !track.is_empty() {
        api.command(&attempt.buffer, &format!("/me is listening to {track}"));
        return Ok(HandlerAction::Ok);
    }
    debug!(player = %report.command_line, status = %report.status, "player had nothing");
    try_player(api, Attempt {
        buffer: attempt.buffer.clone(),
        players: Arc::clone(&attempt.players),
        index: attempt.index + 1,
    })?;
    Ok(HandlerAction::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_are_split_on_pipes() {
        assert_eq!(parse_players("mpc current | cmus-remote -Q||"), vec![
            "mpc current",
            "cmus-remote -Q"
        ]);
        assert!(parse_players("  ").is_empty());
    }
}
