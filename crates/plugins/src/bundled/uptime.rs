//! `uptime` plugin: `/uptime [-o]` shows the system uptime, or sends it to
//! the buffer with `-o`.

use std::time::Duration;

use {
    anyhow::Result,
    chathook_common::{BufferRef, ContextData, Event, HandlerAction},
};

use crate::api::{Plugin, PluginApi};

const UPTIME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct UptimePlugin;

struct Request {
    buffer: BufferRef,
    send: bool,
}

impl Plugin for UptimePlugin {
    fn name(&self) -> &str {
        "uptime"
    }

    fn register(&self, api: &mut PluginApi<'_>) -> Result<()> {
        api.hook_command(
            "uptime",
            "show system uptime (-o: send it to the buffer)",
            "[-o]",
            |api, _, event| {
                let buffer = api.current_buffer();
                let send = match event.text(0).map(str::trim).unwrap_or_default() {
                    "" => false,
                    "-o" => true,
                    _ => {
                        api.print(&buffer, "uptime: usage: /uptime [-o]");
                        return Ok(HandlerAction::OkEat);
                    },
                };
                api.spawn_process(
                    "uptime",
                    UPTIME_TIMEOUT,
                    on_uptime,
                    ContextData::new(Request { buffer, send }),
                )?;
                Ok(HandlerAction::OkEat)
            },
        )?;
        Ok(())
    }
}

fn on_uptime(api: &mut PluginApi<'_>, ctx: &ContextData, event: &Event) -> Result<HandlerAction> {
    let (Some(report), Some(request)) = (event.process(), ctx.get::<Request>()) else {
        return Ok(HandlerAction::Ok);
    };
    let text = report.stdout.trim();
    if !report.success() || text.is_empty() {
        api.print(&request.buffer, &format!("uptime: {}", report.status));
    } else if request.send {
        api.command(&request.buffer, &format!("Uptime: {text}"));
    } else {
        api.print(&request.buffer, &format!("Uptime: {text}"));
    }
    Ok(HandlerAction::Ok)
}
