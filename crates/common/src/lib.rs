//! Shared types, error definitions, and utilities used across all chathook crates.

pub mod error;
pub mod event;
pub mod handler;
pub mod process;

pub use {
    error::{Error, FromMessage, Result},
    event::{Event, EventKind, Field, Payload},
    handler::{BufferRef, ContextData, HandlerAction, HandlerId, PluginId},
    process::{JobId, JobState, ProcessReport, ProcessStatus},
};
