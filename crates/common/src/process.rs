//! Process job identifiers, states and completion reports.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Identifier of a spawned job, unique for the lifetime of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Lifecycle of a job: Pending → Running → Completed | Failed | TimedOut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    Running,
    /// The process exited on its own, whatever the exit code.
    Completed,
    /// The process could not be started or was killed by a signal.
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "kebab-case")]
pub enum ProcessStatus {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    SpawnError(String),
}

impl ProcessStatus {
    pub fn state(&self) -> JobState {
        match self {
            Self::Exited(_) => JobState::Completed,
            Self::Signaled(_) | Self::SpawnError(_) => JobState::Failed,
            Self::TimedOut => JobState::TimedOut,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(sig) => write!(f, "killed by signal {sig}"),
            Self::TimedOut => f.write_str("timed out"),
            Self::SpawnError(reason) => write!(f, "failed to start: {reason}"),
        }
    }
}

/// Everything a process-exit handler learns about a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub job: JobId,
    pub command_line: String,
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream exceeded the capture limit.
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessReport {
    /// Exit code, only for jobs that exited on their own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_has_no_exit_code() {
        let report = ProcessReport {
            job: JobId(1),
            command_line: "sleep 10".into(),
            status: ProcessStatus::TimedOut,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            elapsed: Duration::from_millis(100),
        };
        assert_eq!(report.exit_code(), None);
        assert!(!report.success());
        assert_eq!(report.state(), JobState::TimedOut);
    }

    #[test]
    fn status_maps_to_terminal_state() {
        assert_eq!(ProcessStatus::Exited(3).state(), JobState::Completed);
        assert_eq!(ProcessStatus::Signaled(9).state(), JobState::Failed);
        assert_eq!(
            ProcessStatus::SpawnError("not found".into()).state(),
            JobState::Failed
        );
        assert!(JobState::TimedOut.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn job_id_round_trips_through_text() {
        let id: JobId = "17".parse().unwrap();
        assert_eq!(id, JobId(17));
        assert_eq!(id.to_string(), "17");
        assert!("x17".parse::<JobId>().is_err());
    }
}
