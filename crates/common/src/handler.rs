//! Identifiers and return values shared by handlers.

use std::{any::Any, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Arena index of a registered handler. Never reused within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Identifier of a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(pub u64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// What a handler tells the bus after running.
///
/// Failures are reported by returning `Err` from the callback instead; the
/// bus logs them and moves on to the next handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerAction {
    /// Let the remaining handlers run.
    #[default]
    Ok,
    /// Stop propagation: the event is consumed.
    OkEat,
}

/// Opaque per-registration data handed back to the callback unchanged.
#[derive(Clone, Default)]
pub struct ContextData(Option<Arc<dyn Any + Send + Sync>>);

impl ContextData {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Borrow the data as `T`. `None` when empty or of another type.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for ContextData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("ContextData(..)"),
            None => f.write_str("ContextData(None)"),
        }
    }
}

/// Name of a chat buffer, as understood by the chat engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferRef(pub String);

impl BufferRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The engine's own core buffer.
    pub fn core() -> Self {
        Self("core".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Nick(&'static str);

    #[test]
    fn context_data_downcasts_to_stored_type() {
        let ctx = ContextData::new(Nick("flashy"));
        assert_eq!(ctx.get::<Nick>(), Some(&Nick("flashy")));
        assert_eq!(ctx.get::<String>(), None);
        assert!(!ctx.is_empty());
    }

    #[test]
    fn empty_context_yields_nothing() {
        let ctx = ContextData::none();
        assert!(ctx.is_empty());
        assert!(ctx.get::<u32>().is_none());
        assert_eq!(format!("{ctx:?}"), "ContextData(None)");
    }

    #[test]
    fn clones_share_the_same_value() {
        let ctx = ContextData::new(vec![1, 2, 3]);
        let copy = ctx.clone();
        assert!(std::ptr::eq(
            ctx.get::<Vec<i32>>().unwrap(),
            copy.get::<Vec<i32>>().unwrap()
        ));
    }
}
