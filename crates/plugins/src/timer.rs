//! Interval timers posting ticks to the host inbox.

use std::{collections::HashMap, time::Duration};

use {
    chathook_common::{HandlerId, PluginId},
    tokio::{sync::mpsc, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::process::Delivery;

struct TimerEntry {
    owner: PluginId,
    name: String,
    cancel: CancellationToken,
}

pub struct TimerSet {
    inbox: mpsc::UnboundedSender<Delivery>,
    timers: HashMap<HandlerId, TimerEntry>,
    next: u64,
}

impl TimerSet {
    pub fn new(inbox: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            inbox,
            timers: HashMap::new(),
            next: 1,
        }
    }

    /// Reserve the next timer name (`timer:<n>`).
    pub fn next_name(&mut self) -> String {
        let name = format!("timer:{}", self.next);
        self.next += 1;
        name
    }

    /// Start ticking every `interval` for the handler registered under
    /// `name`. `max_calls == 0` ticks until cancelled.
    ///
    /// Returns `false` when no runtime is available to drive the timer.
    pub fn start(
        &mut self,
        owner: PluginId,
        handler: HandlerId,
        name: String,
        interval: Duration,
        max_calls: u32,
    ) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inbox = self.inbox.clone();
        let tick_name = name.clone();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            let mut fired: u32 = 0;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        fired = fired.saturating_add(1);
                        let remaining = if max_calls == 0 {
                            -1
                        } else {
                            i64::from(max_calls.saturating_sub(fired))
                        };
                        let tick = Delivery::TimerFired {
                            handler,
                            name: tick_name.clone(),
                            remaining,
                        };
                        if inbox.send(tick).is_err() || remaining == 0 {
                            break;
                        }
                    },
                }
            }
        });
        debug!(%handler, %name, ?interval, max_calls, "timer started");
        self.timers.insert(handler, TimerEntry {
            owner,
            name,
            cancel,
        });
        true
    }

    /// Stop the timer behind `handler`, if any.
    pub fn cancel(&mut self, handler: HandlerId) -> bool {
        match self.timers.remove(&handler) {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(%handler, name = %entry.name, "timer cancelled");
                true
            },
            None => false,
        }
    }

    pub fn cancel_owner(&mut self, owner: PluginId) -> usize {
        let ids: Vec<HandlerId> = self
            .timers
            .iter()
            .filter(|(_, t)| t.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        for entry in self.timers.values() {
            entry.cancel.cancel();
        }
    }
}
