//! Handler registry: ordered handlers per event kind with compiled patterns.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use {
    chathook_common::{ContextData, EventKind, HandlerId, PluginId},
    tracing::{debug, info},
};

use crate::{api::Callback, error::Result, pattern::Pattern};

/// Help metadata attached to command handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    /// Argument hint shown in help, e.g. `[-N]`.
    pub args: String,
}

impl CommandInfo {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: args.into(),
        }
    }
}

/// A registered callback bound to an event kind and pattern.
pub struct Handler {
    pub id: HandlerId,
    pub kind: EventKind,
    pub pattern: Pattern,
    pub owner: PluginId,
    pub callback: Callback,
    pub context: ContextData,
    pub command: Option<CommandInfo>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pattern", &self.pattern.as_str())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Live handlers keyed by [`HandlerId`]; per-kind vectors keep registration
/// order. Ids come from a counter and are never reused.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<HandlerId, Arc<Handler>>,
    order: HashMap<EventKind, Vec<HandlerId>>,
    next_id: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        owner: PluginId,
        kind: EventKind,
        pattern: &str,
        callback: Callback,
        context: ContextData,
    ) -> Result<HandlerId> {
        self.insert(owner, kind, pattern, callback, context, None)
    }

    pub fn register_command(
        &mut self,
        owner: PluginId,
        info: CommandInfo,
        callback: Callback,
        context: ContextData,
    ) -> Result<HandlerId> {
        let name = info.name.clone();
        self.insert(owner, EventKind::Command, &name, callback, context, Some(info))
    }

    fn insert(
        &mut self,
        owner: PluginId,
        kind: EventKind,
        pattern: &str,
        callback: Callback,
        context: ContextData,
        command: Option<CommandInfo>,
    ) -> Result<HandlerId> {
        let pattern = Pattern::compile(kind, pattern)?;
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        info!(handler = %id, %kind, pattern = %pattern, plugin = %owner, "handler registered");
        self.handlers.insert(
            id,
            Arc::new(Handler {
                id,
                kind,
                pattern,
                owner,
                callback,
                context,
                command,
            }),
        );
        self.order.entry(kind).or_default().push(id);
        Ok(id)
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        let Some(handler) = self.handlers.remove(&id) else {
            return false;
        };
        if let Some(ids) = self.order.get_mut(&handler.kind) {
            ids.retain(|h| *h != id);
        }
        debug!(handler = %id, kind = %handler.kind, "handler unregistered");
        true
    }

    /// Remove every handler owned by `owner`, returning how many went away.
    pub fn unregister_owner(&mut self, owner: PluginId) -> usize {
        let ids = self.owned_by(owner);
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Handlers of `kind` matching `subject`, in registration order.
    pub fn lookup(&self, kind: EventKind, subject: &str) -> Vec<Arc<Handler>> {
        self.order
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
            .filter(|h| h.pattern.matches(subject))
            .collect()
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn get(&self, id: HandlerId) -> Option<Arc<Handler>> {
        self.handlers.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered commands sorted by name, for help listings.
    pub fn commands(&self) -> Vec<CommandInfo> {
        let mut out: Vec<CommandInfo> = self
            .handlers
            .values()
            .filter_map(|h| h.command.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn owned_by(&self, owner: PluginId) -> Vec<HandlerId> {
        self.handlers
            .values()
            .filter(|h| h.owner == owner)
            .map(|h| h.id)
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
