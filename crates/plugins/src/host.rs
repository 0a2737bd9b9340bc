//! The plugin host: owns the registry, bus, jobs, timers and option store,
//! and turns engine notifications and background deliveries into dispatch.

use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    chathook_common::{Event, EventKind, Field, HandlerId, PluginId},
    chathook_config::{HostConfig, OptionStore},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    api::{Plugin, PluginApi},
    bus::{self, BusStats, Dispatch, EventBus},
    engine::ChatEngine,
    error::{Context, Error, Result},
    process::{Delivery, Launcher, ProcessRunner},
    registry::{CommandInfo, HandlerRegistry},
    timer::TimerSet,
};

/// A loaded plugin as listed by [`PluginHost::plugins`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub handlers: usize,
}

pub(crate) struct PluginRecord {
    pub(crate) name: String,
}

/// An event produced from a background delivery, with its dispatch outcome.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub event: Event,
    pub dispatch: Dispatch,
}

/// State shared by the host and every [`PluginApi`].
pub(crate) struct HostCore {
    pub(crate) registry: HandlerRegistry,
    pub(crate) bus: EventBus,
    pub(crate) runner: ProcessRunner,
    pub(crate) timers: TimerSet,
    pub(crate) options: OptionStore,
    pub(crate) engine: Box<dyn ChatEngine>,
    pub(crate) plugins: BTreeMap<PluginId, PluginRecord>,
}

impl HostCore {
    /// Store `value` and publish exactly one config event carrying it.
    pub(crate) fn set_option(&mut self, key: &str, value: &str) -> Dispatch {
        self.options.set(key, value);
        debug!(key, value, "option set");
        bus::publish(self, &Event::new(EventKind::Config, key, [value]))
    }

    /// Remove `key`; publishes a field-less config event if it existed.
    pub(crate) fn unset_option(&mut self, key: &str) -> bool {
        if self.options.unset(key).is_none() {
            return false;
        }
        debug!(key, "option unset");
        bus::publish(self, &Event::empty(EventKind::Config, key));
        true
    }

    pub(crate) fn unhook(&mut self, id: HandlerId) -> bool {
        self.timers.cancel(id);
        self.registry.unregister(id)
    }

    /// Drop everything `plugin` owns.
    fn release(&mut self, plugin: PluginId) -> usize {
        let timers = self.timers.cancel_owner(plugin);
        let jobs = self.runner.cancel_owner(plugin);
        let handlers = self.registry.unregister_owner(plugin);
        debug!(%plugin, handlers, jobs, timers, "released plugin resources");
        handlers
    }
}

pub struct PluginHost {
    core: HostCore,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    config: HostConfig,
    config_path: Option<PathBuf>,
    next_plugin: u64,
}

impl PluginHost {
    pub fn new(config: HostConfig, engine: impl ChatEngine + 'static) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let core = HostCore {
            registry: HandlerRegistry::new(),
            bus: EventBus::new(config.dispatch.max_depth),
            runner: ProcessRunner::new(
                tx.clone(),
                config.process.output_limit,
                Duration::from_millis(config.process.default_timeout_ms),
            ),
            timers: TimerSet::new(tx),
            options: OptionStore::from_map(config.options.clone()),
            engine: Box::new(engine),
            plugins: BTreeMap::new(),
        };
        Self {
            core,
            inbox,
            config,
            config_path: None,
            next_plugin: 1,
        }
    }

    /// Build a host from the config file at `path`; options are saved back
    /// there.
    pub fn from_file(path: &Path, engine: impl ChatEngine + 'static) -> Result<Self> {
        let config = chathook_config::load_config(path)?;
        Ok(Self::new(config, engine).with_config_path(path))
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.core.runner.set_launcher(launcher);
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    // ── Plugins ─────────────────────────────────────────────────────────────

    /// Load a plugin by running its registration function once.
    ///
    /// A failing (or panicking) registration is rolled back completely.
    pub fn load_plugin<F>(&mut self, name: &str, register: F) -> Result<PluginId>
    where
        F: FnOnce(&mut PluginApi<'_>) -> anyhow::Result<()>,
    {
        if self.core.plugins.values().any(|p| p.name == name) {
            return Err(Error::PluginAlreadyLoaded(name.to_string()));
        }
        let id = PluginId(self.next_plugin);
        self.next_plugin += 1;
        self.core.plugins.insert(id, PluginRecord {
            name: name.to_string(),
        });

        let outcome = {
            let mut api = PluginApi::new(&mut self.core, id);
            catch_unwind(AssertUnwindSafe(|| register(&mut api)))
        };
        let reason = match outcome {
            Ok(Ok(())) => {
                info!(plugin = name, %id, handlers = self.core.registry.owned_by(id).len(), "plugin loaded");
                return Ok(id);
            },
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("panicked: {}", bus::panic_message(panic.as_ref())),
        };

        self.core.release(id);
        self.core.plugins.remove(&id);
        warn!(plugin = name, %reason, "plugin registration failed, rolled back");
        Err(Error::Registration {
            plugin: name.to_string(),
            reason,
        })
    }

    pub fn load(&mut self, plugin: &dyn Plugin) -> Result<PluginId> {
        self.load_plugin(plugin.name(), |api| plugin.register(api))
    }

    /// Unregister every handler of `plugin` and cancel its jobs and timers.
    pub fn unload_plugin(&mut self, plugin: PluginId) -> Result<()> {
        let record = self
            .core
            .plugins
            .remove(&plugin)
            .ok_or(Error::PluginNotFound(plugin))?;
        let handlers = self.core.release(plugin);
        info!(plugin = %record.name, id = %plugin, handlers, "plugin unloaded");
        Ok(())
    }

    pub fn plugin_id(&self, name: &str) -> Option<PluginId> {
        self.core
            .plugins
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| *id)
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.core
            .plugins
            .iter()
            .map(|(id, p)| PluginInfo {
                id: *id,
                name: p.name.clone(),
                handlers: self.core.registry.owned_by(*id).len(),
            })
            .collect()
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Entry point for the chat engine.
    pub fn notify<I, T>(&mut self, kind: EventKind, subject: &str, fields: I) -> Dispatch
    where
        I: IntoIterator<Item = T>,
        T: Into<Field>,
    {
        self.publish(&Event::new(kind, subject, fields))
    }

    pub fn publish(&mut self, event: &Event) -> Dispatch {
        bus::publish(&mut self.core, event)
    }

    // ── Options ─────────────────────────────────────────────────────────────

    pub fn get_config(&self, key: &str) -> Option<&str> {
        self.core.options.get(key)
    }

    pub fn set_config(&mut self, key: &str, value: &str) -> Dispatch {
        self.core.set_option(key, value)
    }

    pub fn unset_config(&mut self, key: &str) -> bool {
        self.core.unset_option(key)
    }

    pub fn options(&self) -> &OptionStore {
        &self.core.options
    }

    /// Write the option store to the config file.
    pub fn save_config(&mut self) -> Result<PathBuf> {
        let path = self
            .config_path
            .clone()
            .unwrap_or_else(chathook_config::find_or_default_config_path);
        self.config.options = self.core.options.to_map();
        chathook_config::save_config_to(&self.config, &path)
            .with_context(|| format!("failed to save options to {}", path.display()))?;
        self.core.options.mark_clean();
        info!(path = %path.display(), options = self.core.options.len(), "options saved");
        self.config_path = Some(path.clone());
        Ok(path)
    }

    /// Unload every plugin, then persist options if they changed.
    pub fn shutdown(&mut self) -> Result<()> {
        let ids: Vec<PluginId> = self.core.plugins.keys().copied().collect();
        for id in ids {
            self.unload_plugin(id)?;
        }
        if self.core.options.is_dirty() {
            self.save_config()?;
        }
        Ok(())
    }

    // ── Deliveries ──────────────────────────────────────────────────────────

    /// Dispatch every delivery that has already arrived, without waiting.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(delivery) = self.inbox.try_recv() {
            self.deliver(delivery);
            count += 1;
        }
        count
    }

    /// Wait for the next job report or timer tick and dispatch it.
    pub async fn next_delivery(&mut self) -> Option<Delivered> {
        let delivery = self.inbox.recv().await?;
        Some(self.deliver(delivery))
    }

    /// Dispatch until no job is outstanding.
    pub async fn settle(&mut self) -> usize {
        let mut count = self.dispatch_pending();
        while self.core.runner.active() > 0 {
            if self.next_delivery().await.is_none() {
                break;
            }
            count += 1;
        }
        count
    }

    fn deliver(&mut self, delivery: Delivery) -> Delivered {
        match delivery {
            Delivery::ProcessExit(report) => {
                let job = self.core.runner.complete(&report);
                let event = Event::process_exit(report);
                let dispatch = bus::publish(&mut self.core, &event);
                if let Some(handler) = job.and_then(|j| j.handler) {
                    self.core.registry.unregister(handler);
                }
                Delivered { event, dispatch }
            },
            Delivery::TimerFired {
                handler,
                name,
                remaining,
            } => {
                let event = Event::new(EventKind::Timer, name, [remaining.to_string()]);
                let dispatch = bus::publish(&mut self.core, &event);
                if remaining == 0 {
                    self.core.unhook(handler);
                }
                Delivered { event, dispatch }
            },
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn commands(&self) -> Vec<CommandInfo> {
        self.core.registry.commands()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.core.registry
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.core.runner
    }

    pub fn bus_stats(&self) -> BusStats {
        self.core.bus.stats()
    }

    pub fn engine(&self) -> &dyn ChatEngine {
        self.core.engine.as_ref()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::engine::NoopEngine,
        chathook_common::{HandlerAction, ProcessStatus},
        std::sync::Mutex,
    };

    fn host() -> PluginHost {
        PluginHost::new(HostConfig::default(), NoopEngine)
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let mut host = host();
        host.load_plugin("browse", |_| Ok(())).unwrap();
        let err = host.load_plugin("browse", |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::PluginAlreadyLoaded(name) if name == "browse"));
    }

    #[test]
    fn failed_registration_is_rolled_back() {
        let mut host = host();
        let err = host
            .load_plugin("half", |api| {
                api.hook_command("half", "", "", |_, _, _| Ok(HandlerAction::Ok))?;
                api.hook_signal("bad;;", |_, _, _| Ok(HandlerAction::Ok), Default::default())?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert!(host.registry().is_empty());
        assert!(host.plugins().is_empty());

        // The name is free again.
        host.load_plugin("half", |_| Ok(())).unwrap();
    }

    #[test]
    fn panicking_registration_is_rolled_back() {
        let mut host = host();
        let err = host
            .load_plugin("bomb", |api| {
                api.hook_command("bomb", "", "", |_, _, _| Ok(HandlerAction::Ok))?;
                panic!("kaboom");
            })
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn unload_unknown_plugin_is_an_error() {
        let mut host = host();
        let err = host.unload_plugin(PluginId(42)).unwrap_err();
        assert!(matches!(err, Error::PluginNotFound(PluginId(42))));
    }

    #[test]
    fn set_config_publishes_one_event_with_the_value() {
        let mut host = host();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        host.load_plugin("watcher", move |api| {
            api.hook_config(
                "webbrowser",
                move |api, _, event| {
                    sink.lock().unwrap().push((
                        event.text(0).map(str::to_string),
                        api.config("webbrowser").map(str::to_string),
                    ));
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();

        let dispatch = host.set_config("webbrowser", "firefox");
        assert_eq!(dispatch.invoked, 1);
        assert_eq!(host.get_config("webbrowser"), Some("firefox"));
        assert!(host.unset_config("webbrowser"));
        assert!(!host.unset_config("webbrowser"));
        assert_eq!(*seen.lock().unwrap(), vec![
            (Some("firefox".to_string()), Some("firefox".to_string())),
            (None, None),
        ]);
    }

    #[test]
    fn options_are_seeded_from_config() {
        let mut config = HostConfig::default();
        config
            .options
            .insert("webbrowser".into(), "lynx".into());
        let host = PluginHost::new(config, NoopEngine);
        assert_eq!(host.get_config("webbrowser"), Some("lynx"));
        assert!(!host.options().is_dirty());
    }

    #[test]
    fn save_and_shutdown_persist_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chathook.toml");
        let mut host = host().with_config_path(&path);
        host.set_config("webbrowser", "firefox");
        host.shutdown().unwrap();

        let reloaded = PluginHost::from_file(&path, NoopEngine).unwrap();
        assert_eq!(reloaded.get_config("webbrowser"), Some("firefox"));
        assert!(!reloaded.options().is_dirty());
    }

    #[test]
    fn foreign_handlers_cannot_be_unhooked() {
        let mut host = host();
        let mut victim = None;
        host.load_plugin("owner", |api| {
            victim = Some(api.hook_signal("x", |_, _, _| Ok(HandlerAction::Ok), Default::default())?);
            Ok(())
        })
        .unwrap();
        let victim = victim.unwrap();
        let result = Arc::new(Mutex::new(None));
        let out = Arc::clone(&result);
        host.load_plugin("intruder", move |api| {
            *out.lock().unwrap() = Some(api.unhook(victim));
            Ok(())
        })
        .unwrap();
        assert_eq!(*result.lock().unwrap(), Some(false));
        assert!(host.registry().contains(victim));
    }

    #[tokio::test]
    async fn process_handler_is_one_shot() {
        let mut host = host();
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outputs);
        host.load_plugin("runner", move |api| {
            api.spawn_process(
                "echo done",
                Duration::ZERO,
                move |_, _, event| {
                    let report = event.process().unwrap();
                    sink.lock().unwrap().push(report.stdout.trim().to_string());
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(host.registry().len(), 1);

        assert_eq!(host.settle().await, 1);
        assert_eq!(*outputs.lock().unwrap(), vec!["done"]);
        assert!(host.registry().is_empty());
        assert_eq!(host.runner().active(), 0);
    }

    #[tokio::test]
    async fn timeout_reports_timed_out() {
        let mut host = host();
        host.load_plugin("slow", |api| {
            api.spawn_process(
                "sleep 5",
                Duration::from_millis(100),
                |_, _, _| Ok(HandlerAction::Ok),
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();
        let delivered = host.next_delivery().await.unwrap();
        let report = delivered.event.process().unwrap();
        assert_eq!(report.status, ProcessStatus::TimedOut);
        assert_eq!(report.exit_code(), None);
        assert_eq!(delivered.dispatch.invoked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_then_unregisters() {
        let mut host = host();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        host.load_plugin("clock", move |api| {
            api.hook_timer(
                Duration::from_secs(60),
                2,
                move |_, _, event| {
                    sink.lock().unwrap().push(event.text(0).unwrap_or_default().to_string());
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();

        for _ in 0..2 {
            let delivered = host.next_delivery().await.unwrap();
            assert_eq!(delivered.event.subject(), "timer:1");
        }
        assert_eq!(*ticks.lock().unwrap(), vec!["1", "0"]);
        assert!(host.registry().is_empty());
    }

    #[test]
    fn zero_interval_timer_is_rejected() {
        let mut host = host();
        let err = host
            .load_plugin("clock", |api| {
                api.hook_timer(Duration::ZERO, 1, |_, _, _| Ok(HandlerAction::Ok), Default::default())?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.to_string().contains("interval"));
    }
}
