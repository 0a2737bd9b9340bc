//! Event bus: routes events to matching handlers in registration order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use {
    chathook_common::{Event, HandlerAction},
    tracing::{debug, trace, warn},
};

use crate::{api::PluginApi, host::HostCore};

/// Outcome of publishing one event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Handlers whose pattern matched.
    pub matched: usize,
    /// Handlers actually called.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// A handler consumed the event.
    pub eaten: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    /// Events no handler matched.
    pub dropped: u64,
    pub failures: u64,
    /// Events refused because dispatch was nested too deeply.
    pub too_deep: u64,
}

#[derive(Debug)]
pub struct EventBus {
    depth: usize,
    max_depth: usize,
    stats: BusStats,
}

impl EventBus {
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
            stats: BusStats::default(),
        }
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Current nesting level; zero outside of dispatch.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Publish `event` to every matching handler.
///
/// The handler list is snapshotted up front. Handlers removed by an earlier
/// handler of the same dispatch are skipped. Errors and panics are logged
/// and counted; they never stop the remaining handlers.
pub(crate) fn publish(core: &mut HostCore, event: &Event) -> Dispatch {
    let mut dispatch = Dispatch::default();
    let kind = event.kind();
    let subject = event.subject();

    if core.bus.depth >= core.bus.max_depth {
        core.bus.stats.too_deep += 1;
        warn!(%kind, subject, depth = core.bus.depth, "dispatch nested too deeply, event dropped");
        return dispatch;
    }
    core.bus.stats.published += 1;

    let handlers = core.registry.lookup(kind, subject);
    dispatch.matched = handlers.len();
    if handlers.is_empty() {
        core.bus.stats.dropped += 1;
        trace!(%kind, subject, "no handler");
        return dispatch;
    }

    core.bus.depth += 1;
    for handler in handlers {
        if !core.registry.contains(handler.id) {
            debug!(handler = %handler.id, "handler removed during dispatch, skipping");
            continue;
        }
        dispatch.invoked += 1;

        let outcome = {
            let mut api = PluginApi::new(core, handler.owner);
            catch_unwind(AssertUnwindSafe(|| {
                (handler.callback)(&mut api, &handler.context, event)
            }))
        };

        match outcome {
            Ok(Ok(HandlerAction::Ok)) => {},
            Ok(Ok(HandlerAction::OkEat)) => {
                debug!(handler = %handler.id, %kind, subject, "event eaten");
                dispatch.eaten = true;
                break;
            },
            Ok(Err(e)) => {
                dispatch.failed += 1;
                core.bus.stats.failures += 1;
                warn!(
                    handler = %handler.id,
                    plugin = %handler.owner,
                    %kind,
                    subject,
                    error = %format!("{e:#}"),
                    "handler failed"
                );
            },
            Err(panic) => {
                dispatch.failed += 1;
                core.bus.stats.failures += 1;
                warn!(
                    handler = %handler.id,
                    plugin = %handler.owner,
                    %kind,
                    subject,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked"
                );
            },
        }
    }
    core.bus.depth -= 1;

    dispatch
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::host::PluginHost,
        chathook_common::{EventKind, Field},
        chathook_config::HostConfig,
        std::sync::{Arc, Mutex},
    };

    fn host() -> PluginHost {
        PluginHost::new(HostConfig::default(), crate::engine::NoopEngine)
    }

    #[test]
    fn eat_stops_later_handlers() {
        let mut host = host();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        host.load_plugin("first", move |api| {
            api.hook_signal(
                "quit",
                move |_, _, _| {
                    a.lock().unwrap().push("first");
                    Ok(HandlerAction::OkEat)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();
        host.load_plugin("second", move |api| {
            api.hook_signal(
                "quit",
                move |_, _, _| {
                    b.lock().unwrap().push("second");
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();

        let dispatch = host.notify(EventKind::Signal, "quit", Vec::<Field>::new());
        assert_eq!(dispatch.matched, 2);
        assert_eq!(dispatch.invoked, 1);
        assert!(dispatch.eaten);
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn errors_and_panics_do_not_stop_siblings() {
        let mut host = host();
        let reached = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&reached);
        host.load_plugin("flaky", move |api| {
            api.hook_signal("ping", |_, _, _| anyhow::bail!("broken"), Default::default())?;
            api.hook_signal("ping", |_, _, _| panic!("boom"), Default::default())?;
            api.hook_signal(
                "ping",
                move |_, _, _| {
                    *counter.lock().unwrap() += 1;
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();

        let dispatch = host.notify(EventKind::Signal, "ping", Vec::<Field>::new());
        assert_eq!(dispatch.invoked, 3);
        assert_eq!(dispatch.failed, 2);
        assert_eq!(*reached.lock().unwrap(), 1);
        assert_eq!(host.bus_stats().failures, 2);
    }

    #[test]
    fn unmatched_events_are_counted_as_dropped() {
        let mut host = host();
        let dispatch = host.notify(EventKind::Command, "nobody", vec!["args"]);
        assert_eq!(dispatch, Dispatch::default());
        let stats = host.bus_stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn handler_removed_mid_dispatch_is_skipped() {
        let mut host = host();
        let victim = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&victim);
        host.load_plugin("remover", move |api| {
            api.hook_signal(
                "tick",
                move |api, _, _| {
                    if let Some(id) = *slot.lock().unwrap() {
                        api.unhook(id);
                    }
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            let id = api.hook_signal(
                "tick",
                |_, _, _| panic!("should have been removed"),
                Default::default(),
            )?;
            *victim.lock().unwrap() = Some(id);
            Ok(())
        })
        .unwrap();

        let dispatch = host.notify(EventKind::Signal, "tick", Vec::<Field>::new());
        assert_eq!(dispatch.matched, 2);
        assert_eq!(dispatch.invoked, 1);
        assert_eq!(dispatch.failed, 0);
    }

    #[test]
    fn recursive_publishing_is_bounded() {
        let mut config = HostConfig::default();
        config.dispatch.max_depth = 4;
        let mut host = PluginHost::new(config, crate::engine::NoopEngine);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        host.load_plugin("echo", move |api| {
            api.hook_signal(
                "loop",
                move |api, _, _| {
                    *counter.lock().unwrap() += 1;
                    api.send_signal("loop", Vec::<Field>::new());
                    Ok(HandlerAction::Ok)
                },
                Default::default(),
            )?;
            Ok(())
        })
        .unwrap();

        host.notify(EventKind::Signal, "loop", Vec::<Field>::new());
        assert_eq!(*calls.lock().unwrap(), 4);
        assert_eq!(host.bus_stats().too_deep, 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
