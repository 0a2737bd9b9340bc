//! The facade plugins see: registration, jobs, options and the chat engine.
//!
//! Command events carry the argument string (everything after the command
//! name) as their first field. Config events carry the new value, or no
//! field when the option was removed.

use std::{sync::Arc, time::Duration};

use {
    chathook_common::{
        BufferRef, ContextData, Event, EventKind, Field, HandlerAction, HandlerId, JobId, PluginId,
    },
    tracing::{debug, warn},
};

use crate::{
    bus::{self, Dispatch},
    error::{Error, Result},
    host::HostCore,
    registry::CommandInfo,
};

/// A handler callback. Returning `Err` counts as a handler failure; the bus
/// logs it and carries on.
pub type Callback = Arc<
    dyn Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
        + Send
        + Sync,
>;

/// Box a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// A loadable plugin.
pub trait Plugin {
    fn name(&self) -> &str;

    /// Called once at load time. Anything registered before an error is
    /// rolled back.
    fn register(&self, api: &mut PluginApi<'_>) -> anyhow::Result<()>;
}

/// Host access bound to one plugin.
pub struct PluginApi<'a> {
    core: &'a mut HostCore,
    plugin: PluginId,
}

impl<'a> PluginApi<'a> {
    pub(crate) fn new(core: &'a mut HostCore, plugin: PluginId) -> Self {
        Self { core, plugin }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin
    }

    pub fn plugin_name(&self) -> &str {
        self.core
            .plugins
            .get(&self.plugin)
            .map_or("", |p| p.name.as_str())
    }

    // ── Registration ────────────────────────────────────────────────────────

    pub fn register<F>(
        &mut self,
        kind: EventKind,
        pattern: &str,
        f: F,
        context: ContextData,
    ) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        self.core
            .registry
            .register(self.plugin, kind, pattern, callback(f), context)
    }

    /// Register `/name`. The first event field is the argument string.
    pub fn hook_command<F>(
        &mut self,
        name: &str,
        description: &str,
        args: &str,
        f: F,
    ) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        self.core.registry.register_command(
            self.plugin,
            CommandInfo::new(name, description, args),
            callback(f),
            ContextData::none(),
        )
    }

    pub fn hook_signal<F>(&mut self, pattern: &str, f: F, context: ContextData) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        self.register(EventKind::Signal, pattern, f, context)
    }

    pub fn hook_config<F>(&mut self, path: &str, f: F, context: ContextData) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        self.register(EventKind::Config, path, f, context)
    }

    pub fn hook_completion<F>(
        &mut self,
        name: &str,
        f: F,
        context: ContextData,
    ) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        self.register(EventKind::Completion, name, f, context)
    }

    /// Call `f` every `interval`, `max_calls` times (zero: until unhooked).
    /// Each tick carries the calls left as its first field, `-1` when
    /// unlimited.
    pub fn hook_timer<F>(
        &mut self,
        interval: Duration,
        max_calls: u32,
        f: F,
        context: ContextData,
    ) -> Result<HandlerId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        if interval.is_zero() {
            return Err(self.registration_error("timer interval must be greater than zero"));
        }
        let name = self.core.timers.next_name();
        let id = self.register(EventKind::Timer, &name, f, context)?;
        if !self
            .core
            .timers
            .start(self.plugin, id, name, interval, max_calls)
        {
            self.core.registry.unregister(id);
            return Err(self.registration_error("timers need an async runtime"));
        }
        Ok(id)
    }

    /// Remove one of this plugin's handlers. Other plugins' handlers are
    /// left alone.
    pub fn unhook(&mut self, id: HandlerId) -> bool {
        match self.core.registry.get(id) {
            Some(handler) if handler.owner == self.plugin => self.core.unhook(id),
            Some(handler) => {
                warn!(handler = %id, owner = %handler.owner, plugin = %self.plugin, "refusing to unhook a foreign handler");
                false
            },
            None => false,
        }
    }

    // ── Processes ───────────────────────────────────────────────────────────

    /// Run `command_line` in the background. `f` is called once with the
    /// `process-exit` event and then removed. A zero `timeout` uses the
    /// configured default.
    pub fn spawn_process<F>(
        &mut self,
        command_line: &str,
        timeout: Duration,
        f: F,
        context: ContextData,
    ) -> Result<JobId>
    where
        F: Fn(&mut PluginApi<'_>, &ContextData, &Event) -> anyhow::Result<HandlerAction>
            + Send
            + Sync
            + 'static,
    {
        let job = self.core.runner.spawn(self.plugin, command_line, timeout);
        match self.register(EventKind::ProcessExit, &job.to_string(), f, context) {
            Ok(handler) => {
                self.core.runner.attach_handler(job, handler);
                Ok(job)
            },
            Err(e) => {
                self.core.runner.cancel(job);
                Err(e)
            },
        }
    }

    pub fn cancel_process(&mut self, job: JobId) -> bool {
        match self.core.runner.job(job) {
            Some(info) if info.owner == self.plugin => self.core.runner.cancel(job),
            _ => false,
        }
    }

    // ── Options ─────────────────────────────────────────────────────────────

    pub fn config(&self, key: &str) -> Option<&str> {
        self.core.options.get(key)
    }

    pub fn set_config(&mut self, key: &str, value: &str) -> Dispatch {
        self.core.set_option(key, value)
    }

    pub fn unset_config(&mut self, key: &str) -> bool {
        self.core.unset_option(key)
    }

    // ── Chat engine ─────────────────────────────────────────────────────────

    pub fn print(&mut self, buffer: &BufferRef, text: &str) {
        self.core.engine.print_line(buffer, text);
    }

    pub fn command(&mut self, buffer: &BufferRef, command: &str) {
        debug!(plugin = %self.plugin, %buffer, command, "plugin command");
        self.core.engine.send_command(buffer, command);
    }

    pub fn current_buffer(&self) -> BufferRef {
        self.core.engine.current_buffer()
    }

    pub fn buffer_lines(&self, buffer: &BufferRef) -> Vec<String> {
        self.core.engine.buffer_lines(buffer)
    }

    /// Broadcast a signal to every plugin, this one included.
    pub fn send_signal<I, T>(&mut self, signal: &str, fields: I) -> Dispatch
    where
        I: IntoIterator<Item = T>,
        T: Into<Field>,
    {
        let event = Event::new(EventKind::Signal, signal, fields);
        bus::publish(self.core, &event)
    }

    fn registration_error(&self, reason: &str) -> Error {
        Error::Registration {
            plugin: self.plugin_name().to_string(),
            reason: reason.to_string(),
        }
    }
}
