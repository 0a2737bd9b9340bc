//! The outbound seam to the chat engine.

use {chathook_common::BufferRef, tracing::info};

/// What the host needs from the chat client it is embedded in.
pub trait ChatEngine: Send {
    /// Print a line into `buffer` without sending it anywhere.
    fn print_line(&mut self, buffer: &BufferRef, text: &str);

    /// Execute `command` (a chat command like `/me ...` or plain text) as if
    /// typed into `buffer`.
    fn send_command(&mut self, buffer: &BufferRef, command: &str);

    fn current_buffer(&self) -> BufferRef;

    /// Lines of `buffer`, oldest first.
    fn buffer_lines(&self, buffer: &BufferRef) -> Vec<String>;
}

/// Engine that only logs. Used when no chat client is attached.
#[derive(Debug, Default)]
pub struct NoopEngine;

impl ChatEngine for NoopEngine {
    fn print_line(&mut self, buffer: &BufferRef, text: &str) {
        info!(%buffer, text, "print");
    }

    fn send_command(&mut self, buffer: &BufferRef, command: &str) {
        info!(%buffer, command, "command");
    }

    fn current_buffer(&self) -> BufferRef {
        BufferRef::core()
    }

    fn buffer_lines(&self, _buffer: &BufferRef) -> Vec<String> {
        Vec::new()
    }
}
