//! Cross-process advisory lock for one queue.
//!
//! The marker is a directory: `create_dir` either creates it or fails with
//! `AlreadyExists`, atomically, on every local filesystem. The holder writes an
//! owner record inside the marker so waiters can reclaim a lock whose lease ran
//! out or whose process died.
//!
//! Removing a marker, by release or by reclaim, happens under a second
//! directory guard `<lock>.reclaim`. While it is held nobody else can remove
//! the marker, so a reclaimer that re-checks the owner under the guard deletes
//! exactly the stale marker it inspected and never a fresh one.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use log::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::{Error, Result};

const OWNER_FILE: &str = "owner";
const OWNER_TMP_FILE: &str = "owner.tmp";
const GUARD_SUFFIX: &str = "reclaim";

/// Contents of `<lock>/owner`: `pid start_time expires_at_ms token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    // Process start time in clock ticks since boot; 0 where unavailable.
    pub start_time: u64,
    pub expires_at_ms: u64,
    pub token: String,
}

/// Held lock; dropping it releases the marker.
#[derive(Debug)]
pub struct QueueLock {
    path: PathBuf,
    token: String,
    lease: Duration,
    poll_interval: Duration,
    released: bool,
}

impl QueueLock {
    /// Blocks until the marker at `path` is created by this caller.
    ///
    /// The parent directory must exist.
    pub fn acquire<C: Clock>(path: &Path, config: &LockConfig, clock: &C) -> Result<Self> {
        let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            match fs::create_dir(path) {
                Ok(()) => {
                    let lock = Self {
                        path: path.to_path_buf(),
                        token: Uuid::new_v4().simple().to_string(),
                        lease: config.lease,
                        poll_interval: config.poll_interval,
                        released: false,
                    };
                    let expires_at_ms = clock.now_millis().saturating_add(millis(config.lease));
                    write_owner_record(path, &lock.token, expires_at_ms)?;
                    return Ok(lock);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            let observed = read_lock_owner(path)?;
            if holder_is_stale(path, observed.as_ref(), config.lease, clock)?
                && reclaim(path, observed.as_ref(), config.lease, clock)?
            {
                continue;
            }

            let mut pause = config.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
                pause = pause.min(deadline - now);
            }
            std::thread::sleep(pause);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_marker(&self.path, &self.token, self.lease, self.poll_interval)
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_marker(&self.path, &self.token, self.lease, self.poll_interval)
        {
            warn!("failed to release queue lock {}: {err}", self.path.display());
        }
    }
}

/// Reads the owner record of the lock at `path`, if there is one.
///
/// Returns `None` when the lock is not held or the record is not yet written.
pub fn read_lock_owner(path: &Path) -> Result<Option<LockOwner>> {
    let mut contents = String::new();
    match File::open(path.join(OWNER_FILE)) {
        Ok(mut file) => {
            file.read_to_string(&mut contents)?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    Ok(parse_owner_record(&contents))
}

fn parse_owner_record(contents: &str) -> Option<LockOwner> {
    let mut parts = contents.split_whitespace();
    Some(LockOwner {
        pid: parts.next()?.parse().ok()?,
        start_time: parts.next()?.parse().ok()?,
        expires_at_ms: parts.next()?.parse().ok()?,
        token: parts.next()?.to_string(),
    })
}

fn write_owner_record(path: &Path, token: &str, expires_at_ms: u64) -> Result<()> {
    let (pid, start_time) = lock_identity()?;
    let record = format!("{pid} {start_time} {expires_at_ms} {token}\n");
    let tmp_path = path.join(OWNER_TMP_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(record.as_bytes())?;
    file.sync_all()?;
    fs::rename(tmp_path, path.join(OWNER_FILE))?;
    Ok(())
}

fn holder_is_stale<C: Clock>(
    path: &Path,
    owner: Option<&LockOwner>,
    lease: Duration,
    clock: &C,
) -> Result<bool> {
    match owner {
        Some(owner) => {
            if owner.expires_at_ms <= clock.now_millis() {
                return Ok(true);
            }
            Ok(!owner_alive(owner)?)
        }
        // Either the holder crashed between mkdir and writing its record, or it
        // is about to write it. Only the marker's age can tell them apart.
        None => Ok(marker_age(path)?.is_some_and(|age| age >= lease)),
    }
}

/// Time since `path` was last modified, or `None` if it is gone.
fn marker_age(path: &Path) -> Result<Option<Duration>> {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    ))
}

/// Deletes a stale marker. Returns false when another waiter is already
/// reclaiming or the marker is no longer the stale one `observed`.
fn reclaim<C: Clock>(
    path: &Path,
    observed: Option<&LockOwner>,
    lease: Duration,
    clock: &C,
) -> Result<bool> {
    let Some(_guard) = RemovalGuard::try_acquire(path, lease)? else {
        return Ok(false);
    };

    let current = read_lock_owner(path)?;
    if current.as_ref() != observed || !holder_is_stale(path, current.as_ref(), lease, clock)? {
        return Ok(false);
    }
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    }

    match observed {
        Some(owner) => warn!(
            "reclaimed stale queue lock {} held by pid {}",
            path.display(),
            owner.pid
        ),
        None => warn!("reclaimed abandoned queue lock {}", path.display()),
    }
    Ok(true)
}

fn remove_marker(path: &Path, token: &str, lease: Duration, poll_interval: Duration) -> Result<()> {
    let _guard = RemovalGuard::acquire(path, lease, poll_interval)?;
    match read_lock_owner(path)? {
        Some(owner) if owner.token != token => {
            warn!(
                "queue lock {} was reclaimed while held; leaving the new holder's marker",
                path.display()
            );
            return Ok(());
        }
        _ => {}
    }
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Exclusive right to remove the marker at `lock_path`.
#[derive(Debug)]
struct RemovalGuard {
    path: PathBuf,
}

impl RemovalGuard {
    fn try_acquire(lock_path: &Path, lease: Duration) -> Result<Option<Self>> {
        let path = guard_path(lock_path);
        match fs::create_dir(&path) {
            Ok(()) => Ok(Some(Self { path })),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                // Held for microseconds by a live process; one older than the
                // lease was left by a crash.
                if marker_age(&path)?.is_some_and(|age| age >= lease) {
                    warn!("removing abandoned lock guard {}", path.display());
                    match fs::remove_dir(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn acquire(lock_path: &Path, lease: Duration, poll_interval: Duration) -> Result<Self> {
        loop {
            if let Some(guard) = Self::try_acquire(lock_path, lease)? {
                return Ok(guard);
            }
            std::thread::sleep(poll_interval);
        }
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        match fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove lock guard {}: {err}", self.path.display()),
        }
    }
}

fn guard_path(lock_path: &Path) -> PathBuf {
    let file_name = lock_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("lock");
    lock_path.with_file_name(format!("{file_name}.{GUARD_SUFFIX}"))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(target_os = "linux")]
fn owner_alive(owner: &LockOwner) -> Result<bool> {
    if owner.pid == 0 {
        return Ok(false);
    }
    match proc_start_time(owner.pid) {
        Ok(start_time) => Ok(owner.start_time == 0 || start_time == owner.start_time),
        Err(Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(target_os = "linux")]
fn lock_identity() -> Result<(u32, u64)> {
    let pid = std::process::id();
    let start_time = proc_start_time(pid)?;
    Ok((pid, start_time))
}

#[cfg(target_os = "linux")]
fn proc_start_time(pid: u32) -> Result<u64> {
    let path = format!("/proc/{pid}/stat");
    let mut contents = String::new();
    File::open(&path)?.read_to_string(&mut contents)?;
    let end = contents
        .rfind(')')
        .ok_or(Error::CorruptMetadata("stat parse"))?;
    let after = &contents[end + 1..];
    let start = after
        .split_whitespace()
        .nth(19)
        .ok_or(Error::CorruptMetadata("stat missing starttime"))?;
    start
        .parse::<u64>()
        .map_err(|_| Error::CorruptMetadata("stat starttime invalid"))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn owner_alive(owner: &LockOwner) -> Result<bool> {
    let Ok(pid) = libc::pid_t::try_from(owner.pid) else {
        return Ok(false);
    };
    if pid <= 0 {
        return Ok(false);
    }
    let res = unsafe { libc::kill(pid, 0) };
    if res == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    Ok(err.raw_os_error() == Some(libc::EPERM))
}

#[cfg(not(unix))]
fn owner_alive(_owner: &LockOwner) -> Result<bool> {
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn lock_identity() -> Result<(u32, u64)> {
    Ok((std::process::id(), 0))
}
