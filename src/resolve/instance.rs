//! Instance and TTY identification.
//!
//! Concurrent AI processes on one workstation are told apart by an instance
//! identifier derived from ambient context, and by the controlling TTY.
//! A null instance id is permitted but disables the concurrent-isolation
//! guarantees.

use std::env;
use std::path::PathBuf;

use crate::constants::resolver::INSTANCE_ENV_OVERRIDE;

/// Derive the instance identifier, in priority order:
/// explicit env override → tmux pane → terminal-emulator session id →
/// window id → None.
pub fn instance_id() -> Option<String> {
    let candidates = [
        INSTANCE_ENV_OVERRIDE,
        "TMUX_PANE",
        "ITERM_SESSION_ID",
        "KITTY_WINDOW_ID",
        "WEZTERM_PANE",
        "TERM_SESSION_ID",
        "WINDOWID",
    ];
    for var in candidates {
        if let Ok(value) = env::var(var)
            && !value.trim().is_empty()
        {
            return Some(sanitize(&value));
        }
    }
    None
}

/// Key for the TTY-indexed context file: the controlling terminal of this
/// process or the nearest ancestor that has one. No fallback to the parent
/// pid itself; a process tree without a TTY resolves to None.
pub fn tty_key() -> Option<String> {
    #[cfg(unix)]
    {
        let mut pid = std::process::id();
        // Bounded walk; a deeper tree than this has no interactive terminal
        for _ in 0..16 {
            if let Some(tty) = tty_of_pid(pid) {
                return Some(sanitize(&tty));
            }
            pid = parent_of(pid)?;
            if pid <= 1 {
                return None;
            }
        }
        None
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Whether the device behind a context record's TTY key still exists.
///
/// Keys that do not name a device path (tmux panes, window ids) cannot be
/// checked and are treated as present; their timestamp governs staleness.
pub fn tty_device_exists(tty_key: &str) -> bool {
    if !tty_key.starts_with("-dev-") {
        return true;
    }
    PathBuf::from(desanitize(tty_key)).exists()
}

/// Make an ambient identifier safe as a file name.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Best-effort inverse of `sanitize` for device paths ("-dev-pts-3" forms).
fn desanitize(key: &str) -> String {
    if key.starts_with("-dev-") {
        key.replacen('-', "/", 3).replace('-', "/")
    } else {
        key.to_string()
    }
}

#[cfg(unix)]
fn tty_of_pid(pid: u32) -> Option<String> {
    for fd in 0..3 {
        let link = PathBuf::from(format!("/proc/{}/fd/{}", pid, fd));
        if let Ok(target) = std::fs::read_link(&link) {
            let target = target.to_string_lossy();
            if target.starts_with("/dev/pts/") || target.starts_with("/dev/tty") {
                return Some(target.to_string());
            }
        }
    }
    None
}

#[cfg(unix)]
fn parent_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // Field 4 of /proc/pid/stat, after the parenthesised comm
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("/dev/pts/3"), "-dev-pts-3");
        assert_eq!(sanitize("%42"), "-42");
        assert_eq!(sanitize("w0:1.2"), "w0-1.2");
        assert_eq!(sanitize("  plain  "), "plain");
    }

    #[test]
    fn test_desanitize_device_paths() {
        assert_eq!(desanitize("-dev-pts-3"), "/dev/pts/3");
        assert_eq!(desanitize("-dev-tty2"), "/dev/tty2");
        assert_eq!(desanitize("tmux-0"), "tmux-0");
    }

    #[test]
    fn test_env_override_wins() {
        // Serialised by cargo's per-test process env being private here:
        // set and clear inside one test only.
        unsafe {
            env::set_var(INSTANCE_ENV_OVERRIDE, "pane/7");
        }
        assert_eq!(instance_id().as_deref(), Some("pane-7"));
        unsafe {
            env::remove_var(INSTANCE_ENV_OVERRIDE);
        }
    }

    #[test]
    fn test_tty_key_is_stable() {
        // Whatever it resolves to in the test environment, two calls agree.
        assert_eq!(tty_key(), tty_key());
    }
}
