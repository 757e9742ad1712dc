//! Git notes plumbing.
//!
//! Reflex checkpoints are mirrored as notes on the current HEAD commit
//! under a dedicated ref so user-facing notes are untouched. All git access
//! goes through a subprocess with a hard timeout; writes serialise on a
//! repository-level advisory lock file.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::types::{EmpiricaError, Result, ResultExt};

/// Handle to one repository's empirica notes ref.
pub struct GitNotes {
    repo_root: PathBuf,
    notes_ref: String,
    timeout: Duration,
}

/// Holds `.git/empirica-notes.lock` for the duration of a write.
struct NotesLock {
    path: PathBuf,
}

impl Drop for NotesLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release notes lock {}: {}", self.path.display(), e);
        }
    }
}

impl GitNotes {
    /// Open the repository containing `dir`, if any.
    pub fn discover(dir: &Path, notes_ref: &str, timeout_secs: u64) -> Option<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let output = run_git(dir, &["rev-parse", "--show-toplevel"], timeout).ok()?;
        let root = PathBuf::from(output.trim());
        if root.as_os_str().is_empty() {
            return None;
        }
        Some(Self {
            repo_root: root,
            notes_ref: notes_ref.to_string(),
            timeout,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Full SHA of the current HEAD commit.
    pub fn head_commit(&self) -> Result<String> {
        let out = run_git(&self.repo_root, &["rev-parse", "HEAD"], self.timeout)?;
        let sha = out.trim().to_string();
        if sha.len() < 7 {
            return Err(EmpiricaError::Git(format!("unexpected HEAD '{}'", sha)));
        }
        Ok(sha)
    }

    /// Append one checkpoint line to the note on `commit`.
    ///
    /// A commit's note accumulates one line per checkpoint; readers match
    /// lines by the identity fields inside the decoded payload.
    pub fn append_note(&self, commit: &str, line: &str) -> Result<()> {
        let _lock = self.acquire_lock()?;
        run_git(
            &self.repo_root,
            &[
                "notes",
                "--ref",
                &self.notes_ref,
                "append",
                "-m",
                line,
                commit,
            ],
            self.timeout,
        )?;
        Ok(())
    }

    /// Read the note body on `commit`, one line per checkpoint. A missing
    /// note is `None`, not an error.
    pub fn read_note(&self, commit: &str) -> Result<Option<Vec<String>>> {
        match run_git(
            &self.repo_root,
            &["notes", "--ref", &self.notes_ref, "show", commit],
            self.timeout,
        ) {
            Ok(body) => Ok(Some(
                body.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(EmpiricaError::Git(msg)) if msg.contains("no note found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Commits carrying a note under this ref, newest first.
    pub fn annotated_commits(&self) -> Result<Vec<String>> {
        let out = match run_git(
            &self.repo_root,
            &["notes", "--ref", &self.notes_ref, "list"],
            self.timeout,
        ) {
            Ok(out) => out,
            // An unborn ref lists nothing
            Err(EmpiricaError::Git(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        // `git notes list` prints "<note blob> <annotated object>"
        Ok(out
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
            .collect())
    }

    fn acquire_lock(&self) -> Result<NotesLock> {
        let path = self.repo_root.join(".git").join("empirica-notes.lock");
        let deadline = Instant::now() + self.timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(NotesLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(EmpiricaError::Git(format!(
                            "timed out waiting for notes lock {}",
                            path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    return Err(EmpiricaError::Git(format!(
                        "cannot create notes lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
    }
}

/// Run a git command with a hard timeout, returning trimmed stdout.
///
/// Output volumes here are far below the pipe buffer, so collecting after
/// exit cannot deadlock.
fn run_git(cwd: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EmpiricaError::Git(format!("failed to spawn git: {}", e)))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EmpiricaError::Git(format!(
                        "git {} timed out after {:?}",
                        args.first().unwrap_or(&""),
                        timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(EmpiricaError::Git(format!("failed to wait for git: {}", e)));
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| EmpiricaError::Git(format!("failed to collect git output: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EmpiricaError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    String::from_utf8(output.stdout)
        .with_context("git produced non-UTF-8 output")
        .map(|s| s.trim_end().to_string())
}
