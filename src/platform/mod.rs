//! Process lifecycle glue.
//!
//! Builds the shell invocation for a command, places the child in its own
//! process group (Unix) or job object (Windows), and implements the
//! terminate-then-kill protocol on top of the per-OS [`ProcessGroup`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;

use crate::process::{CommandSpec, RunEnv};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::ProcessGroup;
#[cfg(windows)]
pub use windows::ProcessGroup;

/// How long a process gets to exit after the termination request.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for the reaper after a forced kill.
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// Builds the command for `spec` with piped output, its own process group,
/// working directory and augmented environment.
pub fn build_command(spec: &CommandSpec, env: &RunEnv, base_dir: &Path) -> Command {
    let mut command = shell_command(&spec.command_line);
    if let Some(dir) = working_dir(spec.working_dir.as_deref(), base_dir) {
        command.current_dir(dir);
    }
    if let Some(path) = prepend_path(std::env::var_os("PATH"), &env.extra_paths) {
        command.env("PATH", path);
    }
    command.envs(&env.vars);
    command.env("FORCE_COLOR", "1");
    command.env("TERM", "xterm-256color");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command.kill_on_drop(true);
    isolate(&mut command);
    command
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    unix::isolate(command);
}

#[cfg(windows)]
fn isolate(command: &mut Command) {
    windows::isolate(command);
}

/// Resolves the effective working directory.
///
/// An absolute override wins; a relative one is joined onto `base_dir`. With
/// no override the base directory is used, and with neither the child
/// inherits ours.
pub fn working_dir(dir_override: Option<&str>, base_dir: &Path) -> Option<PathBuf> {
    let dir_override = dir_override.filter(|d| !d.is_empty()).map(Path::new);
    match dir_override {
        Some(dir) if dir.is_absolute() => Some(dir.to_path_buf()),
        Some(dir) => Some(base_dir.join(dir)),
        None if base_dir.as_os_str().is_empty() => None,
        None => Some(base_dir.to_path_buf()),
    }
}

/// Prepends `extra` to an inherited `PATH` value, keeping every existing entry.
///
/// Returns `None` when there is nothing to prepend so the inherited value is
/// passed through untouched.
pub fn prepend_path(current: Option<OsString>, extra: &[PathBuf]) -> Option<OsString> {
    if extra.is_empty() {
        return None;
    }
    let inherited: Vec<PathBuf> = current
        .as_deref()
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();
    let entries = extra.iter().cloned().chain(inherited);
    match std::env::join_paths(entries) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::debug!(error = %err, "extra PATH entries ignored");
            None
        }
    }
}

/// Asks the group to exit and escalates to a kill after [`GRACE_PERIOD`].
///
/// `done` flips to `true` once the supervised process has exited and its
/// output is drained.
pub async fn terminate_gracefully(
    group: &ProcessGroup,
    done: watch::Receiver<bool>,
) -> std::io::Result<()> {
    terminate_within(group, done, GRACE_PERIOD).await
}

pub(crate) async fn terminate_within(
    group: &ProcessGroup,
    mut done: watch::Receiver<bool>,
    grace: Duration,
) -> std::io::Result<()> {
    if let Err(err) = group.terminate().await {
        tracing::debug!(error = %err, "termination request failed; killing");
        return group.kill().await;
    }

    // A dropped sender also means the reaper is gone.
    if tokio::time::timeout(grace, done.wait_for(|finished| *finished))
        .await
        .is_ok()
    {
        return Ok(());
    }

    group.kill().await?;
    let _ = tokio::time::timeout(KILL_SETTLE, done.wait_for(|finished| *finished)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_override_wins() {
        let dir = std::env::temp_dir();
        let resolved = working_dir(dir.to_str(), Path::new("/project"));
        assert_eq!(resolved, Some(dir));
    }

    #[test]
    fn relative_override_joins_base() {
        let resolved = working_dir(Some("web"), Path::new("project"));
        assert_eq!(resolved, Some(PathBuf::from("project").join("web")));
    }

    #[test]
    fn missing_override_uses_base_or_inherits() {
        assert_eq!(
            working_dir(None, Path::new("project")),
            Some(PathBuf::from("project"))
        );
        assert_eq!(working_dir(Some(""), Path::new("")), None);
        assert_eq!(working_dir(None, Path::new("")), None);
    }

    #[test]
    fn prepends_extra_paths_in_order() {
        let current = std::env::join_paths([PathBuf::from("inherited")]).unwrap();
        let extra = vec![PathBuf::from("first"), PathBuf::from("second")];
        let joined = prepend_path(Some(current), &extra).unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("first"),
                PathBuf::from("second"),
                PathBuf::from("inherited")
            ]
        );
    }

    #[test]
    fn no_extra_paths_leaves_path_alone() {
        assert_eq!(prepend_path(Some(OsString::from("x")), &[]), None);
    }

    #[test]
    fn missing_inherited_path_still_prepends() {
        let joined = prepend_path(None, &[PathBuf::from("only")]).unwrap();
        assert_eq!(joined, OsString::from("only"));
    }

    #[cfg(unix)]
    mod group {
        use super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::time::Instant;

        type Waiter = tokio::task::JoinHandle<std::process::ExitStatus>;

        fn spawn(line: &str) -> (ProcessGroup, watch::Receiver<bool>, Waiter) {
            let spec = CommandSpec::new("t", line);
            let mut child = build_command(&spec, &RunEnv::default(), Path::new(""))
                .spawn()
                .unwrap();
            let group = ProcessGroup::attach(&child).unwrap();
            let (done_tx, done_rx) = watch::channel(false);
            let waiter = tokio::spawn(async move {
                let status = child.wait().await.unwrap();
                let _ = done_tx.send(true);
                status
            });
            (group, done_rx, waiter)
        }

        // A single-threaded runtime only reaps the child if terminating never
        // blocks the thread.
        #[tokio::test(flavor = "current_thread")]
        async fn graceful_stop_lets_the_waiter_run() {
            let (group, done, waiter) = spawn("sleep 30");
            let started = Instant::now();
            terminate_within(&group, done, Duration::from_secs(5))
                .await
                .unwrap();
            assert!(started.elapsed() < Duration::from_secs(3));
            let status = waiter.await.unwrap();
            assert_eq!(status.signal(), Some(libc::SIGTERM));
        }

        #[tokio::test(flavor = "current_thread")]
        async fn ignored_term_escalates_after_grace() {
            let (group, done, waiter) = spawn("trap '' TERM; sleep 30");
            // Give the shell time to install the trap.
            tokio::time::sleep(Duration::from_millis(200)).await;
            let started = Instant::now();
            terminate_within(&group, done, Duration::from_millis(300))
                .await
                .unwrap();
            assert!(started.elapsed() >= Duration::from_millis(300));
            let status = waiter.await.unwrap();
            assert_eq!(status.signal(), Some(libc::SIGKILL));
        }

        #[tokio::test]
        async fn signalling_a_finished_group_is_ok() {
            let (group, _done, waiter) = spawn("true");
            waiter.await.unwrap();
            group.terminate().await.unwrap();
            group.kill().await.unwrap();
        }
    }
}
