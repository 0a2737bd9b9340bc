//! Events dispatched through the bus.
//!
//! An [`Event`] is built once by the host (from a chat engine notification,
//! a config write, a timer tick or a finished process) and never mutated
//! afterwards. Handlers only ever see `&Event`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    process::ProcessReport,
};

// ── EventKind ───────────────────────────────────────────────────────────────

/// Kind shared by events and the handlers that subscribe to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Command,
    Signal,
    Completion,
    Config,
    Timer,
    ProcessExit,
}

impl EventKind {
    /// All variants, for iteration.
    pub const ALL: &'static [EventKind] = &[
        Self::Command,
        Self::Signal,
        Self::Completion,
        Self::Config,
        Self::Timer,
        Self::ProcessExit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Signal => "signal",
            Self::Completion => "completion",
            Self::Config => "config",
            Self::Timer => "timer",
            Self::ProcessExit => "process-exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

// ── Field / Payload ─────────────────────────────────────────────────────────

/// One positional payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Text(String),
    Bytes(Vec<u8>),
}

impl Field {
    /// Text content, or `None` for binary fields.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Field {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Event payload. Process exits carry a typed report; everything else is an
/// ordered list of fields whose meaning depends on the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Fields(Vec<Field>),
    Process(ProcessReport),
}

// ── Event ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    subject: String,
    payload: Payload,
}

impl Event {
    pub fn new<I, F>(kind: EventKind, subject: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Self {
            kind,
            subject: subject.into(),
            payload: Payload::Fields(fields.into_iter().map(Into::into).collect()),
        }
    }

    /// Event without payload fields.
    pub fn empty(kind: EventKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            payload: Payload::Fields(Vec::new()),
        }
    }

    /// Wrap a finished job. The subject is the job id, so process-exit
    /// handlers registered on that id match.
    pub fn process_exit(report: ProcessReport) -> Self {
        Self {
            kind: EventKind::ProcessExit,
            subject: report.job.to_string(),
            payload: Payload::Process(report),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Positional fields. Empty for process-exit events.
    pub fn fields(&self) -> &[Field] {
        match &self.payload {
            Payload::Fields(f) => f,
            Payload::Process(_) => &[],
        }
    }

    /// Text of the field at `index`, if present and textual.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.fields().get(index).and_then(Field::as_text)
    }

    /// All textual fields, binary ones skipped.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.fields().iter().filter_map(Field::as_text)
    }

    pub fn process(&self) -> Option<&ProcessReport> {
        match &self.payload {
            Payload::Process(r) => Some(r),
            Payload::Fields(_) => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::process::{JobId, ProcessStatus};

    #[test]
    fn kind_parses_from_display_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.to_string().parse::<EventKind>().unwrap(), *kind);
        }
        assert!("privmsg".parse::<EventKind>().is_err());
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::ProcessExit).unwrap();
        assert_eq!(json, "\"process-exit\"");
    }

    #[test]
    fn text_accessors_skip_binary_fields() {
        let event = Event::new(
            EventKind::Signal,
            "server1,irc_in2_privmsg",
            vec![Field::from("a"), Field::from(vec![0xff, 0x00]), Field::from("b")],
        );
        assert_eq!(event.text(0), Some("a"));
        assert_eq!(event.text(1), None);
        assert_eq!(event.texts().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(event.fields()[1].as_bytes(), &[0xff, 0x00]);
    }

    #[test]
    fn process_exit_subject_is_job_id() {
        let report = ProcessReport {
            job: JobId(42),
            command_line: "true".into(),
            status: ProcessStatus::Exited(0),
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            elapsed: Duration::from_millis(3),
        };
        let event = Event::process_exit(report);
        assert_eq!(event.kind(), EventKind::ProcessExit);
        assert_eq!(event.subject(), "42");
        assert!(event.fields().is_empty());
        assert_eq!(event.process().unwrap().exit_code(), Some(0));
    }
}
