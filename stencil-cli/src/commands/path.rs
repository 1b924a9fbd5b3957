//! `stencil path`: wait for paths to become accessible.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Args;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Arguments for `stencil path`.
#[derive(Args, Debug)]
pub struct PathArgs {
    /// Paths that must exist.
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Paths must be readable.
    #[arg(short = 'r', long)]
    pub readable: bool,

    /// Paths must be writeable.
    #[arg(short = 'w', long)]
    pub writeable: bool,

    /// Paths must be executable.
    #[arg(short = 'x', long)]
    pub executable: bool,

    /// How long to keep retrying, e.g. `500ms`, `5s`, `2m` or `10`.
    #[arg(short = 't', long, value_name = "DURATION", value_parser = parse_duration, default_value = "0s")]
    pub timeout: Duration,
}

/// Access a path must grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl PathArgs {
    pub fn run(self) -> Result<()> {
        let access = Access {
            read: self.readable,
            write: self.writeable,
            execute: self.executable,
        };
        wait_for(&self.paths, access, self.timeout)
    }
}

/// Check each path in turn, retrying every 100ms until `timeout` has
/// elapsed since the call.
pub fn wait_for(paths: &[PathBuf], access: Access, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut i = 0;
    while i < paths.len() {
        match check(&paths[i], access) {
            Ok(()) => i += 1,
            Err(_) if Instant::now() < deadline => sleep(POLL_INTERVAL),
            Err(err) => bail!("{} -> {err}", paths[i].display()),
        }
    }
    Ok(())
}

/// `access(2)` for the requested mode; nothing is opened.
#[cfg(unix)]
fn check(path: &Path, access: Access) -> io::Result<()> {
    use rustix::fs::Access as Mode;

    let mut mode = Mode::EXISTS;
    if access.read {
        mode |= Mode::READ_OK;
    }
    if access.write {
        mode |= Mode::WRITE_OK;
    }
    if access.execute {
        mode |= Mode::EXEC_OK;
    }
    rustix::fs::access(path, mode).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn check(path: &Path, access: Access) -> io::Result<()> {
    let meta = std::fs::metadata(path)?;
    if access.write && meta.permissions().readonly() {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "not writeable"));
    }
    Ok(())
}

/// Parse `500ms`, `5s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{raw}'"))?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit '{other}' in '{raw}'")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{raw}': {e}"))
}
