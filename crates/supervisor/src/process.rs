use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, kill as kill_one, Signal};
use nix::unistd::Pid;
use regex::bytes::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, warn};
use wire::Event;

use crate::error::SupervisorError;
use crate::events::EventBus;
use crate::line_reader::{AsyncBoundedLineReader, BoundedLine};
use crate::path_remap::PathRemap;
use crate::signal::signal_name;

const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variables that must never reach a spawned child: nested
/// invocations of the primary CLI tool refuse to start if they detect them
/// (§4.3).
const SCRUBBED_ENV_VARS: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

fn skill_prefix_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""content":"/[A-Za-z0-9_-]+:"#).unwrap())
}

/// A spawned child process and everything the supervisor needs to stream,
/// signal, and reap it (§3 ProcessRecord).
pub struct ProcessRecord {
    id: String,
    pid: i32,
    stdin: AsyncMutex<Option<ChildStdin>>,
    latch_rx: watch::Receiver<bool>,
    remap: PathRemap,
}

impl ProcessRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `true` iff the process is still running — i.e. the completion latch
    /// has not fired. Never errors; an unknown process is the caller's
    /// concern, not this type's.
    pub fn is_running(&self) -> bool {
        !*self.latch_rx.borrow()
    }

    pub async fn write_stdin(&self, data: &[u8]) -> Result<(), SupervisorError> {
        let forwarded = self.remap.forward(data);
        let forwarded = strip_skill_prefix(&forwarded);

        if *self.latch_rx.borrow() {
            return Err(SupervisorError::AlreadyExited {
                id: self.id.clone(),
            });
        }

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(SupervisorError::AlreadyExited {
                id: self.id.clone(),
            });
        };

        let mut latch_rx = self.latch_rx.clone();
        tokio::select! {
            res = stdin.write_all(&forwarded) => res.map_err(SupervisorError::Io),
            changed = latch_rx.changed() => {
                let _ = changed;
                Err(SupervisorError::ExitedDuringWrite { id: self.id.clone() })
            }
            _ = tokio::time::sleep(STDIN_WRITE_TIMEOUT) => {
                Err(SupervisorError::StdinTimeout { id: self.id.clone() })
            }
        }
    }

    /// Signals the whole process group, falling back to signalling the
    /// process directly if the group lookup fails (§4.3).
    pub fn kill(&self, sig: Signal) -> Result<(), SupervisorError> {
        let pgid = Pid::from_raw(self.pid);
        match killpg(pgid, sig) {
            Ok(()) => Ok(()),
            Err(_) => kill_one(Pid::from_raw(self.pid), sig).map_err(|source| SupervisorError::Signal {
                id: self.id.clone(),
                source,
            }),
        }
    }
}

fn strip_skill_prefix(bytes: &[u8]) -> Vec<u8> {
    if !contains(bytes, b"\"content\":\"/") {
        return bytes.to_vec();
    }
    skill_prefix_regex()
        .replace_all(bytes, &b"\"content\":\"/"[..])
        .into_owned()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Parameters needed to spawn a child, already decoded from the wire shape.
pub struct SpawnSpec {
    pub id: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub remap: PathRemap,
}

static NEXT_PROC_N: AtomicI32 = AtomicI32::new(1);

/// Spawns `spec`, wiring stdout/stderr streaming and reaping into `events`.
/// Returns the live record; the caller is responsible for registering it in
/// whatever table tracks `id()` uniqueness.
pub async fn spawn(spec: SpawnSpec, events: Arc<EventBus>) -> Result<Arc<ProcessRecord>, SupervisorError> {
    let binary = resolve_executable(&spec.command)?;

    let mut command = Command::new(&binary);
    command.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    apply_env(&mut command, &spec.env);
    command.process_group(0);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = spawn_with_retry(&mut command, &binary)?;
    let pid = child.id().ok_or(SupervisorError::Spawn {
        binary: binary.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "child exited before pid was observed"),
    })? as i32;

    let id = spec.id.filter(|s| !s.is_empty()).unwrap_or_else(|| {
        let n = NEXT_PROC_N.fetch_add(1, Ordering::SeqCst);
        format!("proc-{n}")
    });

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let stdin = child.stdin.take().expect("stdin was piped");

    let (latch_tx, latch_rx) = watch::channel(false);

    let record = Arc::new(ProcessRecord {
        id: id.clone(),
        pid,
        stdin: AsyncMutex::new(Some(stdin)),
        latch_rx,
        remap: spec.remap,
    });

    let stdout_task = tokio::spawn(stream_lines(
        stdout,
        id.clone(),
        record.remap.clone(),
        Arc::clone(&events),
    ));
    let stderr_task = tokio::spawn(stream_lines(
        stderr,
        id.clone(),
        record.remap.clone(),
        Arc::clone(&events),
    ));

    let reap_id = id.clone();
    tokio::spawn(async move {
        // Both readers must drain to EOF before the exit event is emitted,
        // so stdout/exit ordering holds for subscribers (§5).
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        match child.wait().await {
            Ok(status) => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(raw_signal) = status.signal() {
                        events
                            .publish(Event::Exit {
                                id: reap_id.clone(),
                                exit_code: status.code().unwrap_or(-1),
                                signal: Some(signal_name(raw_signal)),
                                oom_kill_count: None,
                            })
                            .await;
                    } else {
                        events
                            .publish(Event::Exit {
                                id: reap_id.clone(),
                                exit_code: status.code().unwrap_or(0),
                                signal: None,
                                oom_kill_count: None,
                            })
                            .await;
                    }
                }
            }
            Err(err) => {
                warn!(id = %reap_id, error = %err, "failed to reap child process");
                events
                    .publish(Event::ProcessError {
                        id: reap_id.clone(),
                        message: format!("failed to reap process: {err}"),
                        fatal: true,
                    })
                    .await;
            }
        }

        latch_tx.send_replace(true);
    });

    Ok(record)
}

async fn stream_lines(
    pipe: impl tokio::io::AsyncRead + Unpin,
    id: String,
    remap: PathRemap,
    events: Arc<EventBus>,
) {
    let mut reader = AsyncBoundedLineReader::new(pipe, MAX_LINE_BYTES);
    loop {
        match reader.next_line().await {
            BoundedLine::Line { bytes } => {
                let remapped = remap.reverse(&bytes);
                let mut data = String::from_utf8_lossy(&remapped).into_owned();
                data.push('\n');
                events.publish(Event::Stdout { id: id.clone(), data }).await;
            }
            BoundedLine::LineTooLong { observed_bytes, max_line_bytes } => {
                events
                    .publish(Event::ProcessError {
                        id: id.clone(),
                        message: format!(
                            "line exceeded {max_line_bytes} bytes (observed {observed_bytes}), discarded"
                        ),
                        fatal: false,
                    })
                    .await;
            }
            BoundedLine::Io(err) => {
                events
                    .publish(Event::ProcessError {
                        id: id.clone(),
                        message: format!("read error: {err}"),
                        fatal: false,
                    })
                    .await;
            }
            BoundedLine::Eof => break,
        }
    }
}

fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<tokio::process::Child, SupervisorError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(SupervisorError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

fn apply_env(command: &mut Command, overrides: &BTreeMap<String, String>) {
    for (k, v) in overrides {
        command.env(k, v);
    }
    for var in SCRUBBED_ENV_VARS {
        command.env_remove(var);
    }
}

/// Resolves `command` to an executable path (§4.3): as-is, then PATH lookup,
/// then a login-shell `which` (to pick up user-scoped installs not on a
/// minimal service PATH), then fixed fallback directories. Failure to
/// resolve is not an error here — it surfaces as a spawn failure from the OS
/// when the unresolved command is handed to `Command::spawn`.
fn resolve_executable(command: &str) -> Result<PathBuf, SupervisorError> {
    let as_is = Path::new(command);
    if as_is.is_file() {
        return Ok(as_is.to_path_buf());
    }

    let basename = match as_is.file_name().and_then(|n| n.to_str()) {
        Some(basename) => basename,
        None => return Ok(as_is.to_path_buf()),
    };

    if let Some(found) = path_lookup(basename) {
        return Ok(found);
    }

    if let Some(found) = login_shell_which(basename) {
        return Ok(found);
    }

    let mut candidates = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join(".local/bin").join(basename));
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(basename));
    candidates.push(PathBuf::from("/usr/bin").join(basename));

    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    debug!(command, "could not resolve executable; deferring to OS spawn failure");
    Ok(PathBuf::from(command))
}

fn path_lookup(basename: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(basename);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn login_shell_which(basename: &str) -> Option<PathBuf> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let output = std::process::Command::new(shell)
        .arg("-lc")
        .arg(format!("which {basename}"))
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        return None;
    }
    let candidate = PathBuf::from(path);
    candidate.is_file().then_some(candidate)
}
