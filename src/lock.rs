use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// `isLocked` treats a heartbeat older than this as evidence the other
/// process is wedged rather than merely quiet (spec §4.G).
const STALE_AFTER: Duration = Duration::from_secs(30);
/// Grace period between `SIGTERM` and the `SIGKILL` escalation when taking
/// over a stale lock.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// The JSON document written to the lock file: the PID that holds it, and
/// the unix timestamp of its last heartbeat (spec §4.G / §6).
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    #[serde(rename = "signaledAt")]
    signaled_at: u64,
}

/// A single-instance guard backed by a PID file (spec §4.G). Liveness is
/// judged two ways: whether the recorded pid still answers to signal 0, and
/// whether its heartbeat is recent. A live-but-stale holder (process alive,
/// heartbeat older than `STALE_AFTER`) is assumed wedged and is terminated
/// so this process can take the lock over.
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Acquires the lock. Call once at startup, after `is_locked` —
    /// `is_locked` itself performs the stale-holder takeover, so by the
    /// time this runs the file (if any) belongs to either no one or a
    /// process this call is about to overwrite.
    pub fn lock(&self) -> Result<(), Error> {
        if self.is_locked()? {
            let pid = self.read()?.map(|r| r.pid).unwrap_or(0);
            return Err(Error::AlreadyLocked(pid));
        }
        let record = LockRecord { pid: std::process::id(), signaled_at: now_unix() };
        self.write(&record)
    }

    /// Spec §4.G `isLocked`: read the file (if any); if its pid is alive
    /// and heartbeated within `STALE_AFTER`, the lock is genuinely held —
    /// return `true`. If the pid is alive but the heartbeat has gone
    /// stale, escalate `SIGTERM` then (after `KILL_GRACE`) `SIGKILL` and
    /// report not-locked so the caller proceeds. A dead pid, or no file at
    /// all, is simply not locked. On platforms without process-signal
    /// support (`cfg(not(unix))`) this unconditionally reports `false`.
    pub fn is_locked(&self) -> Result<bool, Error> {
        let Some(record) = self.read()? else {
            return Ok(false);
        };
        if !process_is_alive(record.pid) {
            return Ok(false);
        }

        let age = now_unix().saturating_sub(record.signaled_at);
        if age < STALE_AFTER.as_secs() {
            return Ok(true);
        }

        log::warn!(
            "lock file pid {} is alive but hasn't signaled in {}s; terminating it",
            record.pid,
            age
        );
        send_signal(record.pid, false)?; // SIGTERM
        std::thread::sleep(KILL_GRACE);
        if process_is_alive(record.pid) {
            send_signal(record.pid, true)?; // SIGKILL
        }
        Ok(false)
    }

    /// Spec §4.G `signal`: rewrite `signaledAt` with the current time.
    /// The event loop calls this on a periodic timer so a live process's
    /// heartbeat keeps advancing; a wedged process whose loop stopped
    /// ticking will fall behind and be judged stale by `is_locked`.
    pub fn signal(&self) -> Result<(), Error> {
        let record = LockRecord { pid: std::process::id(), signaled_at: now_unix() };
        self.write(&record)
    }

    /// Alias kept for callers that think in terms of "heartbeat" rather
    /// than the spec's `signal` name.
    pub fn heartbeat(&self) -> Result<(), Error> {
        self.signal()
    }

    fn read(&self) -> Result<Option<LockRecord>, Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, record: &LockRecord) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(record)?;
        std::fs::write(&self.path, bytes).map_err(Error::from)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Ok(Some(record)) = self.read() {
            if record.pid == std::process::id() {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_signal(pid: u32, escalate: bool) -> Result<(), Error> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let signal = if escalate { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(pid as i32), signal).map_err(|e| Error::Io {
        source: std::io::Error::from_raw_os_error(e as i32),
    })
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _escalate: bool) -> Result<(), Error> {
    Ok(())
}
