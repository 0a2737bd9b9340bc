//! Plugin host core: handler registry, event bus, process runner, timers and
//! the registration facade plugins are written against.
//!
//! Everything runs on one dispatch thread. Background work (jobs, timers)
//! reports back through the host inbox and is dispatched by
//! [`PluginHost::dispatch_pending`], [`PluginHost::next_delivery`] or
//! [`PluginHost::settle`].

pub mod api;
pub mod bundled;
pub mod bus;
pub mod engine;
pub mod error;
pub mod host;
pub mod pattern;
pub mod process;
pub mod registry;
pub mod timer;

pub use {
    api::{Callback, Plugin, PluginApi, callback},
    bus::{BusStats, Dispatch},
    engine::{ChatEngine, NoopEngine},
    error::{Error, Result},
    host::{Delivered, PluginHost, PluginInfo},
    pattern::Pattern,
    process::{Delivery, JobInfo, LaunchFuture, LaunchRequest, Launcher, TokioLauncher},
    registry::{CommandInfo, Handler, HandlerRegistry},
};
