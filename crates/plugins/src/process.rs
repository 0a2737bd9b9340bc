//! Asynchronous external-command jobs.
//!
//! A job is launched through a [`Launcher`], supervised by a tokio task, and
//! its [`ProcessReport`] is posted to the host inbox as a [`Delivery`]. The
//! host turns it into a `process-exit` event on the dispatch thread.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    process::Stdio,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {
    chathook_common::{HandlerId, JobId, JobState, PluginId, ProcessReport, ProcessStatus},
    tokio::{
        io::{AsyncRead, AsyncReadExt},
        process::Command,
        sync::mpsc,
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

/// Signal number reported for cancelled jobs.
pub const SIGKILL: i32 = 9;

/// How long to wait for the output pipes to close once the child is gone.
/// Past that the readers stop and keep what they have.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Work posted from background tasks to the host inbox.
#[derive(Debug)]
pub enum Delivery {
    ProcessExit(ProcessReport),
    TimerFired {
        handler: HandlerId,
        name: String,
        /// Calls left, `-1` for unlimited.
        remaining: i64,
    },
}

/// Everything a launcher needs to run one job.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job: JobId,
    pub command_line: String,
    pub timeout: Option<Duration>,
    pub output_limit: usize,
    pub cancel: CancellationToken,
}

pub type LaunchFuture = Pin<Box<dyn Future<Output = ProcessReport> + Send>>;

/// Starts jobs. The returned future resolves once the job has finished,
/// timed out, been cancelled or failed to start.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> LaunchFuture;
}

/// Runs jobs as child processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    fn launch(&self, request: LaunchRequest) -> LaunchFuture {
        Box::pin(run_child(request))
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

async fn run_child(request: LaunchRequest) -> ProcessReport {
    let started = Instant::now();
    let report = |status, stdout: Captured, stderr: Captured| ProcessReport {
        job: request.job,
        command_line: request.command_line.clone(),
        status,
        truncated: stdout.truncated || stderr.truncated,
        stdout: stdout.text,
        stderr: stderr.text,
        elapsed: started.elapsed(),
    };

    let argv = match shlex::split(&request.command_line) {
        Some(argv) if !argv.is_empty() => argv,
        _ => {
            return report(
                ProcessStatus::SpawnError("empty or unbalanced command line".into()),
                Captured::default(),
                Captured::default(),
            );
        },
    };

    let spawned = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return report(
                ProcessStatus::SpawnError(format!("{}: {e}", argv[0])),
                Captured::default(),
                Captured::default(),
            );
        },
    };

    let limit = request.output_limit;
    let stop_reading = CancellationToken::new();
    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, limit, stop_reading.clone())));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, limit, stop_reading.clone())));

    let deadline = async {
        match request.timeout {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };

    let status = tokio::select! {
        waited = child.wait() => match waited {
            Ok(status) => exit_status(status),
            Err(e) => ProcessStatus::SpawnError(e.to_string()),
        },
        () = request.cancel.cancelled() => {
            kill(&mut child, request.job).await;
            ProcessStatus::Signaled(SIGKILL)
        },
        () = deadline => {
            warn!(job = %request.job, command = %request.command_line, "job timed out");
            kill(&mut child, request.job).await;
            ProcessStatus::TimedOut
        },
    };

    let stdout = collect(stdout, &stop_reading, request.job).await;
    let stderr = collect(stderr, &stop_reading, request.job).await;
    report(status, stdout, stderr)
}

async fn kill(child: &mut tokio::process::Child, job: JobId) {
    if let Err(e) = child.kill().await {
        debug!(%job, error = %e, "failed to kill child");
    }
}

/// Read `pipe` to the end or until `stop` fires, keeping at most `limit`
/// bytes. Stopping early marks the capture truncated.
async fn read_capped<R: AsyncRead + Unpin>(
    mut pipe: R,
    limit: usize,
    stop: CancellationToken,
) -> Captured {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0_u8; 8192];
    loop {
        let read = tokio::select! {
            read = pipe.read(&mut buf) => read,
            () = stop.cancelled() => {
                truncated = true;
                break;
            },
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            },
        }
    }
    Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    }
}

async fn collect(
    reader: Option<JoinHandle<Captured>>,
    stop: &CancellationToken,
    job: JobId,
) -> Captured {
    let Some(mut handle) = reader else {
        return Captured::default();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            // A grandchild still holds the pipe open.
            debug!(%job, "output pipe still open, keeping partial output");
            stop.cancel();
            handle.await.unwrap_or_default()
        },
    }
}

fn exit_status(status: std::process::ExitStatus) -> ProcessStatus {
    if let Some(code) = status.code() {
        return ProcessStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessStatus::Signaled(signal);
        }
    }
    ProcessStatus::Exited(-1)
}

// ── Runner ──────────────────────────────────────────────────────────────────

/// Snapshot of a job the runner still tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub owner: PluginId,
    pub command_line: String,
    pub state: JobState,
    /// One-shot process-exit handler, removed after delivery.
    pub handler: Option<HandlerId>,
    pub started: Instant,
}

struct JobEntry {
    owner: PluginId,
    command_line: String,
    state: Arc<Mutex<JobState>>,
    cancel: CancellationToken,
    handler: Option<HandlerId>,
    started: Instant,
}

impl JobEntry {
    fn info(&self, id: JobId) -> JobInfo {
        JobInfo {
            id,
            owner: self.owner,
            command_line: self.command_line.clone(),
            state: *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            handler: self.handler,
            started: self.started,
        }
    }
}

/// Tracks jobs from spawn until their report has been delivered.
pub struct ProcessRunner {
    launcher: Arc<dyn Launcher>,
    inbox: mpsc::UnboundedSender<Delivery>,
    jobs: BTreeMap<JobId, JobEntry>,
    next_id: u64,
    spawned: u64,
    output_limit: usize,
    default_timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(
        inbox: mpsc::UnboundedSender<Delivery>,
        output_limit: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            launcher: Arc::new(TokioLauncher),
            inbox,
            jobs: BTreeMap::new(),
            next_id: 1,
            spawned: 0,
            output_limit,
            default_timeout: (!default_timeout.is_zero()).then_some(default_timeout),
        }
    }

    pub fn set_launcher(&mut self, launcher: Arc<dyn Launcher>) {
        self.launcher = launcher;
    }

    /// Start `command_line`. A zero `timeout` falls back to the configured
    /// default, and zero there means no timeout.
    ///
    /// Never fails: launch problems come back as a `SpawnError` report.
    pub fn spawn(&mut self, owner: PluginId, command_line: &str, timeout: Duration) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.spawned += 1;

        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(JobState::Pending));
        let timeout = if timeout.is_zero() {
            self.default_timeout
        } else {
            Some(timeout)
        };
        self.jobs.insert(id, JobEntry {
            owner,
            command_line: command_line.to_string(),
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            handler: None,
            started: Instant::now(),
        });
        info!(job = %id, plugin = %owner, command = command_line, ?timeout, "spawning job");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            set_state(&state, JobState::Failed);
            self.post(ProcessReport {
                job: id,
                command_line: command_line.to_string(),
                status: ProcessStatus::SpawnError("no async runtime available".into()),
                stdout: String::new(),
                stderr: String::new(),
                truncated: false,
                elapsed: Duration::ZERO,
            });
            return id;
        };

        let running = self.launcher.launch(LaunchRequest {
            job: id,
            command_line: command_line.to_string(),
            timeout,
            output_limit: self.output_limit,
            cancel,
        });
        let inbox = self.inbox.clone();
        runtime.spawn(async move {
            set_state(&state, JobState::Running);
            let report = running.await;
            set_state(&state, report.state());
            debug!(job = %report.job, status = %report.status, "job finished");
            if inbox.send(Delivery::ProcessExit(report)).is_err() {
                debug!(job = %id, "host gone, dropping job report");
            }
        });
        id
    }

    /// Bind the one-shot process-exit handler to a job.
    pub fn attach_handler(&mut self, job: JobId, handler: HandlerId) {
        if let Some(entry) = self.jobs.get_mut(&job) {
            entry.handler = Some(handler);
        }
    }

    /// Kill a running job; its report will say `Signaled`. Unknown or
    /// finished jobs are ignored.
    pub fn cancel(&mut self, job: JobId) -> bool {
        match self.jobs.get(&job) {
            Some(entry) if !entry.cancel.is_cancelled() => {
                info!(%job, "cancelling job");
                entry.cancel.cancel();
                true
            },
            _ => false,
        }
    }

    pub fn cancel_owner(&mut self, owner: PluginId) -> usize {
        let ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Forget a job whose report reached the host.
    pub fn complete(&mut self, report: &ProcessReport) -> Option<JobInfo> {
        let entry = self.jobs.remove(&report.job)?;
        set_state(&entry.state, report.state());
        Some(entry.info(report.job))
    }

    pub fn job(&self, id: JobId) -> Option<JobInfo> {
        self.jobs.get(&id).map(|e| e.info(id))
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.jobs.iter().map(|(id, e)| e.info(*id)).collect()
    }

    /// Jobs whose report has not been delivered yet.
    pub fn active(&self) -> usize {
        self.jobs.len()
    }

    pub fn spawned_total(&self) -> u64 {
        self.spawned
    }

    fn post(&self, report: ProcessReport) {
        if self.inbox.send(Delivery::ProcessExit(report)).is_err() {
            debug!("host gone, dropping job report");
        }
    }
}

fn set_state(state: &Mutex<JobState>, next: JobState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request(command_line: &str, timeout: Option<Duration>) -> LaunchRequest {
        LaunchRequest {
            job: JobId(1),
            command_line: command_line.into(),
            timeout,
            output_limit: 64 * 1024,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let report = TokioLauncher.launch(request("echo hello world", None)).await;
        assert_eq!(report.status, ProcessStatus::Exited(0));
        assert_eq!(report.stdout.trim(), "hello world");
        assert!(!report.truncated);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let report = TokioLauncher.launch(request("sh -c 'echo oops >&2; exit 3'", None)).await;
        assert_eq!(report.exit_code(), Some(3));
        assert_eq!(report.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let report = TokioLauncher
            .launch(request("definitely-not-a-real-program-42", None))
            .await;
        assert!(matches!(report.status, ProcessStatus::SpawnError(_)));
        assert_eq!(report.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn unbalanced_quotes_are_a_spawn_error() {
        let report = TokioLauncher.launch(request("echo 'oops", None)).await;
        assert!(matches!(report.status, ProcessStatus::SpawnError(_)));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let report = TokioLauncher
            .launch(request("sleep 5", Some(Duration::from_millis(100))))
            .await;
        assert_eq!(report.status, ProcessStatus::TimedOut);
        assert_eq!(report.exit_code(), None);
        assert!(report.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancel_reports_signaled() {
        let req = request("sleep 5", None);
        let cancel = req.cancel.clone();
        let running = tokio::spawn(TokioLauncher.launch(req));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let report = running.await.unwrap();
        assert_eq!(report.status, ProcessStatus::Signaled(SIGKILL));
    }

    #[tokio::test]
    async fn output_is_capped() {
        let mut req = request("sh -c 'printf 0123456789abcdef'", None);
        req.output_limit = 4;
        let report = TokioLauncher.launch(req).await;
        assert_eq!(report.stdout, "0123");
        assert!(report.truncated);
        assert!(report.success());
    }

    #[tokio::test]
    async fn output_survives_a_grandchild_holding_the_pipe() {
        let report = TokioLauncher
            .launch(request("sh -c 'echo hi; sleep 3 &'", None))
            .await;
        assert_eq!(report.status, ProcessStatus::Exited(0));
        assert_eq!(report.stdout, "hi\n");
        assert!(report.truncated);
        assert!(report.elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn runner_tracks_jobs_until_completed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = ProcessRunner::new(tx, 1024, Duration::ZERO);
        let job = runner.spawn(PluginId(1), "echo hi", Duration::ZERO);
        runner.attach_handler(job, HandlerId(7));
        assert_eq!(runner.active(), 1);
        assert_eq!(runner.job(job).unwrap().handler, Some(HandlerId(7)));

        let Some(Delivery::ProcessExit(report)) = rx.recv().await else {
            panic!("expected a process report");
        };
        assert_eq!(report.job, job);
        let info = runner.complete(&report).unwrap();
        assert_eq!(info.state, JobState::Completed);
        assert_eq!(runner.active(), 0);
        assert_eq!(runner.spawned_total(), 1);
        assert!(runner.complete(&report).is_none());
    }

    #[tokio::test]
    async fn cancel_owner_only_cancels_that_plugin() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut runner = ProcessRunner::new(tx, 1024, Duration::ZERO);
        runner.spawn(PluginId(1), "sleep 5", Duration::ZERO);
        runner.spawn(PluginId(1), "sleep 5", Duration::ZERO);
        runner.spawn(PluginId(2), "sleep 5", Duration::ZERO);
        assert_eq!(runner.cancel_owner(PluginId(1)), 2);
        assert_eq!(runner.cancel_owner(PluginId(1)), 0);
        assert!(!runner.cancel(JobId(99)));
        runner.cancel_owner(PluginId(2));
    }

    #[test]
    fn spawn_without_runtime_reports_spawn_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = ProcessRunner::new(tx, 1024, Duration::ZERO);
        let job = runner.spawn(PluginId(1), "echo hi", Duration::ZERO);
        let Ok(Delivery::ProcessExit(report)) = rx.try_recv() else {
            panic!("expected an immediate report");
        };
        assert_eq!(report.job, job);
        assert!(matches!(report.status, ProcessStatus::SpawnError(_)));
    }
}
