//! Execution of the test command inside an isolation plan.

use std::collections::VecDeque;
use std::fs::File;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use mgp_types::round_to;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::confine::{self, kill_group, wait_for, Confinement, ConfinementSpec};
use crate::error::{SandboxError, SandboxResult};
use crate::isolation::{
    IsolationPlan, CAPABILITY_CONTROL, NETWORK_CONTROL, RESOURCE_CONTROL, SYSCALL_CONTROL,
    WRITE_PATH_CONTROL,
};
use crate::manifest::SandboxManifest;
use crate::preflight::normalize_path;


/// Exit code test runners use for "collected nothing".
pub const NO_TESTS_EXIT_CODE: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
    Timeout,
    NoTests,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::NoTests => "no_tests",
            Self::Error => "error",
        }
    }

    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            NO_TESTS_EXIT_CODE => Self::NoTests,
            _ => Self::Failed,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_s: f64,
    pub memory_mb: f64,
    pub disk_mb: f64,
    pub wall_s: f64,
}

impl ResourceUsage {
    /// Rounded to milliseconds / kilobytes so hashes are stable.
    pub fn rounded(&self) -> Self {
        Self {
            cpu_s: round_to(self.cpu_s, 3),
            memory_mb: round_to(self.memory_mb, 3),
            disk_mb: round_to(self.disk_mb, 3),
            wall_s: round_to(self.wall_s, 3),
        }
    }
}

/// What the executor saw while the command ran.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub usage: ResourceUsage,
    pub observed_syscalls: Vec<String>,
    pub attempted_write_paths: Vec<String>,
    pub attempted_network_hosts: Vec<String>,
    /// Set when a kernel filter held the run to the allowlist; it then
    /// stands in for `observed_syscalls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall_filter: Option<FilterVerdict>,
}

/// Outcome of a kernel syscall filter over one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterVerdict {
    Held,
    Tripped,
}

impl ExecutionReport {
    pub fn new(status: RunStatus, exit_code: Option<i32>) -> Self {
        Self {
            status,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            usage: ResourceUsage::default(),
            observed_syscalls: Vec::new(),
            attempted_write_paths: Vec::new(),
            attempted_network_hosts: Vec::new(),
            syscall_filter: None,
        }
    }

    /// A clean passing run that touched only basic file syscalls.
    pub fn passing() -> Self {
        Self::new(RunStatus::Ok, Some(0))
            .with_stdout("1 passed")
            .with_syscalls(["read", "write", "close"])
            .with_usage(ResourceUsage {
                cpu_s: 0.25,
                memory_mb: 64.0,
                disk_mb: 1.0,
                wall_s: 0.3,
            })
    }

    pub fn timed_out(wall_s: f64) -> Self {
        Self::new(RunStatus::Timeout, None).with_usage(ResourceUsage {
            wall_s,
            ..ResourceUsage::default()
        })
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_syscalls<I, S>(mut self, syscalls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observed_syscalls = syscalls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_write_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attempted_write_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_network_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attempted_network_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }
}

/// Runs a manifest's command under an already-prepared isolation plan.
///
/// The enforcer wraps every call in the manifest timeout; an executor that is
/// dropped mid-run must release whatever it spawned.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Mark each control as enforced only if this executor will actually
    /// apply it. The enforcer refuses any plan that comes back incomplete.
    fn attest(&self, plan: IsolationPlan, manifest: &SandboxManifest) -> IsolationPlan;

    async fn execute(
        &self,
        manifest: &SandboxManifest,
        plan: &IsolationPlan,
    ) -> SandboxResult<ExecutionReport>;
}

/// Runs the command as a confined child process.
///
/// The child gets a scrubbed environment, a private scratch directory as
/// `HOME` and `TMPDIR`, and the plan's controls applied by the kernel.
/// Telemetry is what the host measured: rusage, the files that appeared
/// under the writable roots, and whether the syscall filter fired.
#[derive(Clone, Debug, Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn working_dir(&self) -> SandboxResult<PathBuf> {
        let dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| SandboxError::Backend(format!("working_dir:{e}")))?,
        };
        dir.canonicalize()
            .map_err(|e| SandboxError::Backend(format!("working_dir:{e}")))
    }
}

fn scope<'a>(plan: &'a IsolationPlan, control: &str) -> SandboxResult<&'a [String]> {
    plan.control(control)
        .filter(|c| c.enforced)
        .map(|c| c.scope.as_slice())
        .ok_or_else(|| SandboxError::Unenforceable(control.to_string()))
}

/// Absolute writable roots, created so Landlock can anchor on them.
fn writable_roots(working_dir: &Path, roots: &[String]) -> SandboxResult<Vec<PathBuf>> {
    roots
        .iter()
        .filter_map(|r| normalize_path(r))
        .filter(|r| !r.is_empty())
        .map(|r| {
            let path = working_dir.join(r);
            std::fs::create_dir_all(&path)
                .map_err(|e| SandboxError::Backend(format!("write_root:{e}")))?;
            Ok(path)
        })
        .collect()
}

/// Files modified under `roots` since `since`, with their total size.
fn write_set(working_dir: &Path, roots: &[PathBuf], since: SystemTime) -> (Vec<String>, u64) {
    let mut written = Vec::new();
    let mut bytes = 0;
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() || meta.modified().map(|t| t < since).unwrap_or(true) {
                continue;
            }
            bytes += meta.len();
            if let Ok(rel) = entry.path().strip_prefix(working_dir) {
                written.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    written.sort();
    (written, bytes)
}

fn scratch_usage(scratch: &Path) -> u64 {
    WalkDir::new(scratch)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn read_capture(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Kills the child's process group if the run future is dropped first.
struct KillOnDrop {
    pid: i32,
    reaped: Arc<Mutex<bool>>,
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        kill_group(self.pid, &self.reaped);
    }
}

#[async_trait]
impl SandboxExecutor for ProcessExecutor {
    fn attest(&self, mut plan: IsolationPlan, manifest: &SandboxManifest) -> IsolationPlan {
        for control in &mut plan.controls {
            if control.enforced && !confine::supports(control) {
                warn!(
                    mutation_id = %manifest.mutation_id,
                    control = %control.control,
                    mechanism = %control.mechanism,
                    "Host cannot apply isolation control"
                );
                control.enforced = false;
            }
        }
        plan
    }

    async fn execute(
        &self,
        manifest: &SandboxManifest,
        plan: &IsolationPlan,
    ) -> SandboxResult<ExecutionReport> {
        let Some((program, args)) = manifest.command.split_first() else {
            return Err(SandboxError::Backend("empty_command".into()));
        };
        scope(plan, RESOURCE_CONTROL)?;
        scope(plan, NETWORK_CONTROL)?;

        let working_dir = self.working_dir()?;
        let scratch = tempfile::Builder::new()
            .prefix("mgp-sandbox-")
            .tempdir()
            .map_err(|e| SandboxError::Backend(format!("scratch_dir:{e}")))?;
        let roots = writable_roots(&working_dir, scope(plan, WRITE_PATH_CONTROL)?)?;
        let mut writable = roots.clone();
        writable.push(scratch.path().to_path_buf());
        writable.push(PathBuf::from("/dev/null"));

        let confinement = Confinement::build(&ConfinementSpec {
            syscalls: scope(plan, SYSCALL_CONTROL)?,
            capabilities: scope(plan, CAPABILITY_CONTROL)?,
            writable,
            manifest,
        })
        .map_err(SandboxError::Unenforceable)?;

        let stdout_path = scratch.path().join(".stdout");
        let stderr_path = scratch.path().join(".stderr");
        let capture = |path: &Path| {
            File::create(path).map_err(|e| SandboxError::Backend(format!("capture:{e}")))
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(&manifest.env)
            .env("MGP_REPLAY_SEED", manifest.replay_seed.as_str())
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(capture(&stdout_path)?)
            .stderr(capture(&stderr_path)?)
            .process_group(0);
        if manifest.deterministic_clock {
            command.env("MGP_DETERMINISTIC_CLOCK", "1");
        }
        confine::install(&mut command, confinement);

        debug!(
            mutation_id = %manifest.mutation_id,
            program = %program,
            backend = %plan.backend,
            "spawning confined sandbox command"
        );
        let since = SystemTime::now();
        let started = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ExecutionReport::new(RunStatus::Error, None)
                    .with_stderr(format!("spawn_failed:{e}")));
            }
        };
        let pid = child.id() as i32;
        let reaped = Arc::new(Mutex::new(false));
        let _guard = KillOnDrop {
            pid,
            reaped: reaped.clone(),
        };
        let waited = tokio::task::spawn_blocking(move || wait_for(pid, &reaped))
            .await
            .map_err(|e| SandboxError::Backend(format!("wait_join:{e}")))?
            .map_err(|e| SandboxError::Backend(format!("wait:{e}")))?;
        let wall_s = started.elapsed().as_secs_f64();

        let exit = ExitStatus::from_raw(waited.status);
        let tripped = exit.signal() == Some(libc::SIGSYS);
        let status = match (exit.code(), tripped) {
            (Some(code), _) => RunStatus::from_exit_code(code),
            (None, true) => RunStatus::Failed,
            (None, false) => RunStatus::Error,
        };
        let (written, root_bytes) = write_set(&working_dir, &roots, since);
        let disk_bytes = root_bytes + scratch_usage(scratch.path());
        let mut report = ExecutionReport::new(status, exit.code())
            .with_stdout(read_capture(&stdout_path))
            .with_stderr(read_capture(&stderr_path))
            .with_write_paths(written)
            .with_usage(ResourceUsage {
                cpu_s: waited.cpu_s,
                memory_mb: waited.max_rss_kb as f64 / 1024.0,
                disk_mb: disk_bytes as f64 / (1024.0 * 1024.0),
                wall_s,
            });
        report.syscall_filter = Some(if tripped {
            FilterVerdict::Tripped
        } else {
            FilterVerdict::Held
        });
        Ok(report)
    }
}

/// Replays queued reports in order, then repeats the fallback.
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<ExecutionReport>>,
    fallback: ExecutionReport,
    delay: Option<Duration>,
    invocations: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(fallback: ExecutionReport) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::new(ExecutionReport::passing())
    }

    pub fn then(self, report: ExecutionReport) -> Self {
        self.queue.lock().push_back(report);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedExecutor {
    /// Scripted runs apply nothing; the plan stands as the backend made it.
    fn attest(&self, plan: IsolationPlan, _manifest: &SandboxManifest) -> IsolationPlan {
        plan
    }

    async fn execute(
        &self,
        _manifest: &SandboxManifest,
        _plan: &IsolationPlan,
    ) -> SandboxResult<ExecutionReport> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
